//! ## BIOS Parameter Block Module
//!
//! BPB structures for FAT12/FAT16 volumes, modeled directly on the
//! foundation/tail split the teacher uses for its own (FAT12/16/32) boot
//! sector, but trimmed to the FAT32-free scope this engine supports: no
//! `BPBExtension32`, no `Info` (FSINFO) sector.
//!
//! Layout (all little-endian unless noted), from offset 0 of the boot
//! sector: `0x000` JMP opcode byte, `0x003` 8-byte OEM, `0x00B` bytes/sector,
//! `0x00D` sectors/cluster, `0x00E` reserved sectors, `0x010` FAT count,
//! `0x011` root dir entries, `0x013` total sectors (16-bit), `0x015` media
//! id, `0x016` FAT sectors, `0x018` sectors/track, `0x01A` heads, `0x01C`
//! hidden sectors, `0x020` total sectors (32-bit, DOS 3.31+).

use log::debug;
use thiserror::Error;

use a2kit_macro::DiskStruct;
use a2kit_macro_derive::DiskStruct;

pub const BOOT_SIGNATURE: [u8;2] = [0x55,0xaa];
pub const JMP_BOOT: [u8;3] = [0xeb,0x3c,0x90];
pub const OEM_NAME: [u8;8] = *b"PCJS.ORG";

#[derive(Error,Debug)]
pub enum Error {
    #[error("boot sector signature 0x55AA missing")]
    BadSignature,
    #[error("BPB fields fail internal consistency checks")]
    InvalidBPB,
    #[error("no matching BPB template for this capacity")]
    NoTemplate
}

/// BPB fields common to every FAT12/FAT16 volume, starting at byte 11 of
/// the boot sector.
#[derive(DiskStruct,Clone,Copy)]
pub struct BPBFoundation {
    pub bytes_per_sec: [u8;2],
    pub sec_per_clus: u8,
    pub reserved_sectors: [u8;2],
    pub num_fats: u8,
    pub root_ent_cnt: [u8;2],
    pub tot_sec_16: [u8;2],
    pub media: u8,
    pub fat_size_16: [u8;2],
    pub sec_per_trk: [u8;2],
    pub num_heads: [u8;2],
    pub hidd_sec: [u8;4],
    pub tot_sec_32: [u8;4]
}

/// Follows the BPB foundation at byte 36.
#[derive(DiskStruct,Clone,Copy)]
pub struct BPBTail {
    pub drv_num: u8,
    pub reserved1: u8,
    pub boot_sig: u8,
    pub vol_id: [u8;4],
    pub vol_lab: [u8;11],
    pub fil_sys_type: [u8;8]
}

impl BPBFoundation {
    pub fn verify(&self) -> bool {
        let mut ok = true;
        let bytes = self.sec_size();
        if ![512,1024,2048,4096].contains(&bytes) {
            debug!("invalid bytes per sector {}",bytes);
            ok = false;
        }
        if ![1,2,4,8,16,32,64,128].contains(&self.sec_per_clus) {
            debug!("invalid sectors per cluster {}",self.sec_per_clus);
            ok = false;
        }
        if self.reserved_sectors == [0,0] {
            debug!("invalid reserved sector count 0");
            ok = false;
        }
        if self.num_fats == 0 {
            debug!("invalid FAT count 0");
            ok = false;
        }
        if self.tot_sec_16 == [0,0] && self.tot_sec_32 == [0,0,0,0] {
            debug!("invalid total sector count 0");
            ok = false;
        }
        ok
    }
    pub fn sec_size(&self) -> u64 { u16::from_le_bytes(self.bytes_per_sec) as u64 }
    pub fn sec_per_clus(&self) -> u8 { self.sec_per_clus }
    pub fn cluster_bytes(&self) -> u64 { self.sec_per_clus as u64 * self.sec_size() }
    pub fn heads(&self) -> u64 { u16::from_le_bytes(self.num_heads) as u64 }
    pub fn secs_per_track(&self) -> u64 { u16::from_le_bytes(self.sec_per_trk) as u64 }
    pub fn hidden_secs(&self) -> u64 { u32::from_le_bytes(self.hidd_sec) as u64 }
    pub fn res_secs(&self) -> u16 { u16::from_le_bytes(self.reserved_sectors) }
    pub fn num_fats(&self) -> u64 { self.num_fats as u64 }
    pub fn root_dir_entries(&self) -> u64 { u16::from_le_bytes(self.root_ent_cnt) as u64 }
    pub fn tot_sec(&self) -> u64 {
        match self.tot_sec_16 {
            [0,0] => u32::from_le_bytes(self.tot_sec_32) as u64,
            _ => u16::from_le_bytes(self.tot_sec_16) as u64
        }
    }
    pub fn fat_secs(&self) -> u64 { u16::from_le_bytes(self.fat_size_16) as u64 }
    pub fn root_dir_secs(&self) -> u64 {
        let bytes = self.sec_size();
        if bytes == 0 { return u16::MAX as u64; }
        (self.root_dir_entries()*32 + bytes - 1) / bytes
    }
    pub fn first_data_sec(&self) -> u64 {
        self.res_secs() as u64 + self.num_fats() * self.fat_secs() + self.root_dir_secs()
    }
    pub fn data_rgn_secs(&self) -> u64 {
        self.tot_sec().saturating_sub(self.first_data_sec())
    }
    /// `clusTotal = floor((totalSecs - vbaData) / clusSecs)`
    pub fn cluster_total(&self) -> u64 {
        if self.sec_per_clus == 0 { return 0; }
        self.data_rgn_secs() / self.sec_per_clus as u64
    }
    /// `nFATBits = 12` iff `clusTotal <= 4084`
    pub fn fat_bits(&self) -> u32 {
        if self.cluster_total() <= 4084 { 12 } else { 16 }
    }
}

/// The whole boot sector: JMP, OEM string, BPB foundation, tail, and the
/// remainder of the sector up through the `0x55AA` signature.
#[derive(Clone)]
pub struct BootSector {
    jmp: [u8;3],
    oem: [u8;8],
    foundation: BPBFoundation,
    tail: BPBTail,
    remainder: Vec<u8>
}

impl BootSector {
    pub fn foundation(&self) -> &BPBFoundation { &self.foundation }
    pub fn foundation_mut(&mut self) -> &mut BPBFoundation { &mut self.foundation }
    pub fn tail(&self) -> &BPBTail { &self.tail }

    pub fn label(&self) -> Option<[u8;11]> {
        if self.tail.boot_sig == 0x29 && self.tail.vol_lab != [0x20;11] {
            Some(self.tail.vol_lab)
        } else {
            None
        }
    }

    pub fn oem(&self) -> [u8;8] { self.oem }

    /// Parse a boot sector out of a full-length (>= 512 byte) buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self,Error> {
        if bytes.len() < 512 {
            return Err(Error::InvalidBPB);
        }
        Ok(Self {
            jmp: bytes[0..3].try_into().expect("unreachable"),
            oem: bytes[3..11].try_into().expect("unreachable"),
            foundation: BPBFoundation::from_bytes(&bytes[11..36].to_vec()),
            tail: BPBTail::from_bytes(&bytes[36..62].to_vec()),
            remainder: bytes[62..].to_vec()
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ans = Vec::new();
        ans.extend_from_slice(&self.jmp);
        ans.extend_from_slice(&self.oem);
        ans.extend_from_slice(&self.foundation.to_bytes());
        ans.extend_from_slice(&self.tail.to_bytes());
        ans.extend_from_slice(&self.remainder);
        ans
    }

    /// Verify the `0x55AA` signature and that the BPB passes internal
    /// consistency checks. Should be called before trusting `from_bytes`.
    pub fn verify(sec_data: &[u8]) -> bool {
        if sec_data.len() < 512 {
            debug!("sector too small for a boot sector");
            return false;
        }
        if [sec_data[510],sec_data[511]] != BOOT_SIGNATURE {
            debug!("0x55AA signature missing");
            return false;
        }
        let bpb = BPBFoundation::from_bytes(&sec_data[11..36].to_vec());
        bpb.verify()
    }

    /// Build a fresh boot sector from one of the static templates, stamping
    /// in the jmp/OEM bytes and the `0x55AA` signature.
    pub fn from_template(bpb: BPBFoundation, sec_size: usize) -> Self {
        let tail = BPBTail::new();
        let used = 3 + 8 + bpb.len() + tail.len();
        let mut remainder = vec![0u8; sec_size.saturating_sub(used)];
        if remainder.len() >= 2 {
            let n = remainder.len();
            remainder[n-2] = BOOT_SIGNATURE[0];
            remainder[n-1] = BOOT_SIGNATURE[1];
        }
        Self { jmp: JMP_BOOT, oem: OEM_NAME, foundation: bpb, tail, remainder }
    }
}

/// Media IDs from the geometry table (spec §6); duplicated in the BPB and
/// in FAT cell 0.
pub const MEDIA_160K: u8 = 0xfe;
pub const MEDIA_180K: u8 = 0xfc;
pub const MEDIA_320K: u8 = 0xff;
pub const MEDIA_360K: u8 = 0xfd;
pub const MEDIA_720_1200K: u8 = 0xf9;
pub const MEDIA_1440_2880K: u8 = 0xf0;
pub const MEDIA_FIXED: u8 = 0xf8;

pub const SSDD_525_8: BPBFoundation = BPBFoundation {
    bytes_per_sec: [0,2], sec_per_clus: 1, reserved_sectors: [1,0], num_fats: 2,
    root_ent_cnt: u16::to_le_bytes(0x40), tot_sec_16: u16::to_le_bytes(320),
    media: MEDIA_160K, fat_size_16: [1,0], sec_per_trk: [8,0], num_heads: [1,0],
    hidd_sec: [0,0,0,0], tot_sec_32: [0,0,0,0]
};

pub const SSDD_525_9: BPBFoundation = BPBFoundation {
    bytes_per_sec: [0,2], sec_per_clus: 1, reserved_sectors: [1,0], num_fats: 2,
    root_ent_cnt: u16::to_le_bytes(0x40), tot_sec_16: u16::to_le_bytes(360),
    media: MEDIA_180K, fat_size_16: [1,0], sec_per_trk: [9,0], num_heads: [1,0],
    hidd_sec: [0,0,0,0], tot_sec_32: [0,0,0,0]
};

pub const DSDD_525_8: BPBFoundation = BPBFoundation {
    bytes_per_sec: [0,2], sec_per_clus: 2, reserved_sectors: [1,0], num_fats: 2,
    root_ent_cnt: u16::to_le_bytes(0x70), tot_sec_16: u16::to_le_bytes(640),
    media: MEDIA_320K, fat_size_16: [1,0], sec_per_trk: [8,0], num_heads: [2,0],
    hidd_sec: [0,0,0,0], tot_sec_32: [0,0,0,0]
};

pub const DSDD_525_9: BPBFoundation = BPBFoundation {
    bytes_per_sec: [0,2], sec_per_clus: 2, reserved_sectors: [1,0], num_fats: 2,
    root_ent_cnt: u16::to_le_bytes(0x70), tot_sec_16: u16::to_le_bytes(720),
    media: MEDIA_360K, fat_size_16: [2,0], sec_per_trk: [9,0], num_heads: [2,0],
    hidd_sec: [0,0,0,0], tot_sec_32: [0,0,0,0]
};

pub const DSQD_525: BPBFoundation = BPBFoundation {
    bytes_per_sec: [0,2], sec_per_clus: 2, reserved_sectors: [1,0], num_fats: 2,
    root_ent_cnt: u16::to_le_bytes(0x70), tot_sec_16: u16::to_le_bytes(1280),
    media: 0xfb, fat_size_16: [2,0], sec_per_trk: [8,0], num_heads: [2,0],
    hidd_sec: [0,0,0,0], tot_sec_32: [0,0,0,0]
};

pub const DSHD_525: BPBFoundation = BPBFoundation {
    bytes_per_sec: [0,2], sec_per_clus: 1, reserved_sectors: [1,0], num_fats: 2,
    root_ent_cnt: u16::to_le_bytes(0xe0), tot_sec_16: u16::to_le_bytes(2400),
    media: MEDIA_720_1200K, fat_size_16: [7,0], sec_per_trk: [15,0], num_heads: [2,0],
    hidd_sec: [0,0,0,0], tot_sec_32: [0,0,0,0]
};

pub const D35_720: BPBFoundation = BPBFoundation {
    bytes_per_sec: [0,2], sec_per_clus: 2, reserved_sectors: [1,0], num_fats: 2,
    root_ent_cnt: u16::to_le_bytes(0x70), tot_sec_16: u16::to_le_bytes(1440),
    media: MEDIA_720_1200K, fat_size_16: [3,0], sec_per_trk: [9,0], num_heads: [2,0],
    hidd_sec: [0,0,0,0], tot_sec_32: [0,0,0,0]
};

pub const D35_1440: BPBFoundation = BPBFoundation {
    bytes_per_sec: [0,2], sec_per_clus: 1, reserved_sectors: [1,0], num_fats: 2,
    root_ent_cnt: u16::to_le_bytes(0xe0), tot_sec_16: u16::to_le_bytes(2880),
    media: MEDIA_1440_2880K, fat_size_16: [9,0], sec_per_trk: [18,0], num_heads: [2,0],
    hidd_sec: [0,0,0,0], tot_sec_32: [0,0,0,0]
};

pub const D35_2880: BPBFoundation = BPBFoundation {
    bytes_per_sec: [0,2], sec_per_clus: 2, reserved_sectors: [1,0], num_fats: 2,
    root_ent_cnt: u16::to_le_bytes(0xf0), tot_sec_16: u16::to_le_bytes(5760),
    media: MEDIA_1440_2880K, fat_size_16: [9,0], sec_per_trk: [36,0], num_heads: [2,0],
    hidd_sec: [0,0,0,0], tot_sec_32: [0,0,0,0]
};

/// ~10 MB fixed disk: a 2-sector hidden reserve ahead of the boot sector
/// for the MBR the builder emits. `hiddenSecs + totalSecs` (2 + 20024)
/// divides evenly by `heads * sectorsPerTrack` (2*17=34), so the geometry
/// resolver's `cylinders = (hidden+total)/(heads*spt)` covers the whole
/// partition, including its hidden reserve, with no sectors stranded past
/// the grid on re-parse. `totalSecs = 20024` so a `target_kb=10012`
/// request (`10012 KiB * 2 sectors/KiB`) matches it exactly, per the
/// builder's hidden-sector capacity check.
pub const FIXED_10MB: BPBFoundation = BPBFoundation {
    bytes_per_sec: [0,2], sec_per_clus: 8, reserved_sectors: [1,0], num_fats: 2,
    root_ent_cnt: u16::to_le_bytes(512), tot_sec_16: u16::to_le_bytes(20024),
    media: MEDIA_FIXED, fat_size_16: [32,0], sec_per_trk: [17,0], num_heads: [2,0],
    hidd_sec: [2,0,0,0], tot_sec_32: [0,0,0,0]
};

/// One row of the "default BPB" template table, in the order the resolver
/// and the builder both search it.
pub struct Template {
    pub name: &'static str,
    pub bpb: BPBFoundation
}

/// Ordered template table: geometry resolution searches it for a match on
/// media id and buffer length; the builder searches it for the first one
/// whose data area fits the requested file set.
pub const TEMPLATES: &[Template] = &[
    Template { name: "160K",  bpb: SSDD_525_8 },
    Template { name: "180K",  bpb: SSDD_525_9 },
    Template { name: "320K",  bpb: DSDD_525_8 },
    Template { name: "360K",  bpb: DSDD_525_9 },
    Template { name: "640K",  bpb: DSQD_525 },
    Template { name: "720K",  bpb: D35_720 },
    Template { name: "1200K", bpb: DSHD_525 },
    Template { name: "1440K", bpb: D35_1440 },
    Template { name: "2880K", bpb: D35_2880 },
    Template { name: "10MB-fixed", bpb: FIXED_10MB },
];

/// Buffer length in bytes implied by a template's total-sector/bytes-per-sector fields.
pub fn template_buffer_len(bpb: &BPBFoundation) -> u64 {
    bpb.tot_sec() * bpb.sec_size()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fat_bits_cutoff() {
        assert_eq!(SSDD_525_8.fat_bits(),12);
        assert_eq!(D35_2880.fat_bits(),12);
    }

    #[test]
    fn test_template_buffer_lengths() {
        assert_eq!(template_buffer_len(&SSDD_525_8),163840);
        assert_eq!(template_buffer_len(&SSDD_525_9),184320);
        assert_eq!(template_buffer_len(&D35_1440),1474560);
        assert_eq!(template_buffer_len(&D35_2880),2949120);
    }

    #[test]
    fn test_fixed_disk_template_is_fat12_behind_a_hidden_reserve() {
        assert_eq!(FIXED_10MB.media,MEDIA_FIXED);
        assert_eq!(FIXED_10MB.fat_bits(),12);
        assert_eq!(FIXED_10MB.hidden_secs(),2);
        // hidden reserve plus volume divides evenly by one track, so the
        // geometry resolver's cylinder count covers the whole partition
        assert_eq!((FIXED_10MB.hidden_secs() + FIXED_10MB.tot_sec()) % (FIXED_10MB.heads()*FIXED_10MB.secs_per_track()),0);
    }

    #[test]
    fn test_boot_sector_roundtrip() {
        let bs = BootSector::from_template(SSDD_525_8,512);
        let bytes = bs.to_bytes();
        assert_eq!(bytes.len(),512);
        assert_eq!([bytes[510],bytes[511]],BOOT_SIGNATURE);
        assert!(BootSector::verify(&bytes));
    }
}
