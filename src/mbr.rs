//! ## Master Boot Record Module
//!
//! MBR partition table parsing and emission for the single-FAT-partition
//! case the builder produces, plus the general reader the decoder uses to
//! walk an arbitrary partition table (spec §4.4, §6).

use thiserror::Error;
use log::debug;

#[derive(Error,Debug)]
pub enum Error {
    #[error("boot sector is not an MBR (missing 0x55AA)")]
    NotAnMbr
}

pub const PARTITION_TYPE_FAT12: u8 = 0x01;
pub const PARTITION_TYPE_FAT16: u8 = 0x04;
pub const PARTITION_TYPE_EXTENDED: u8 = 0x05;

const ENTRY_OFFSETS: [usize;4] = [0x1be,0x1ce,0x1de,0x1ee];
const ENTRY_LEN: usize = 16;

/// One 16-byte partition table entry.
#[derive(Clone,Copy,Debug)]
pub struct PartitionEntry {
    pub status: u8,
    pub chs_first: [u8;3],
    pub kind: u8,
    pub chs_last: [u8;3],
    pub lba_first: u32,
    pub lba_total: u32
}

impl PartitionEntry {
    pub fn is_active(&self) -> bool { self.status >= 0x80 }
    pub fn is_extended(&self) -> bool { self.kind == PARTITION_TYPE_EXTENDED }
    pub fn is_fat(&self) -> bool { self.kind == PARTITION_TYPE_FAT12 || self.kind == PARTITION_TYPE_FAT16 }

    pub fn from_bytes(b: &[u8]) -> Self {
        Self {
            status: b[0],
            chs_first: [b[1],b[2],b[3]],
            kind: b[4],
            chs_last: [b[5],b[6],b[7]],
            lba_first: u32::from_le_bytes(b[8..12].try_into().expect("unreachable")),
            lba_total: u32::from_le_bytes(b[12..16].try_into().expect("unreachable"))
        }
    }
    pub fn to_bytes(&self) -> [u8;16] {
        let mut ans = [0u8;16];
        ans[0] = self.status;
        ans[1..4].copy_from_slice(&self.chs_first);
        ans[4] = self.kind;
        ans[5..8].copy_from_slice(&self.chs_last);
        ans[8..12].copy_from_slice(&self.lba_first.to_le_bytes());
        ans[12..16].copy_from_slice(&self.lba_total.to_le_bytes());
        ans
    }
}

/// Parse the four partition entries out of a boot sector buffer.
/// Requires the `0x55AA` signature at `0x1FE`.
pub fn read_table(boot_sector: &[u8]) -> Result<[PartitionEntry;4],Error> {
    if boot_sector.len() < 512 || [boot_sector[0x1fe],boot_sector[0x1ff]] != [0x55,0xaa] {
        return Err(Error::NotAnMbr);
    }
    let mut ans = [PartitionEntry::from_bytes(&[0u8;16]);4];
    for (i,off) in ENTRY_OFFSETS.iter().enumerate() {
        ans[i] = PartitionEntry::from_bytes(&boot_sector[*off..*off+ENTRY_LEN]);
    }
    Ok(ans)
}

/// Write the four entries plus the `0x55AA` signature into a 512-byte
/// boot-sector-shaped buffer, leaving bytes before `0x1BE` untouched.
pub fn write_table(boot_sector: &mut [u8], entries: &[PartitionEntry;4]) {
    for (i,off) in ENTRY_OFFSETS.iter().enumerate() {
        boot_sector[*off..*off+ENTRY_LEN].copy_from_slice(&entries[i].to_bytes());
    }
    boot_sector[0x1fe] = 0x55;
    boot_sector[0x1ff] = 0xaa;
}

/// Build a single active FAT12 partition table, CHS addresses computed
/// from `heads`/`sectors_per_track`. `lba_first` is the partition's own
/// starting LBA, i.e. the hidden-sector reserve the caller placed the
/// volume behind; `total_sectors` is the partition's own sector count
/// (the volume's `tot_sec`, not the whole disk's).
pub fn single_fat12_entry(total_sectors: u32, heads: u32, sectors_per_track: u32, lba_first: u32) -> PartitionEntry {
    let chs_first = lba_to_chs(lba_first, heads, sectors_per_track);
    let chs_last = lba_to_chs(lba_first + total_sectors.saturating_sub(1), heads, sectors_per_track);
    PartitionEntry {
        status: 0x80,
        chs_first,
        kind: PARTITION_TYPE_FAT12,
        chs_last,
        lba_first,
        lba_total: total_sectors
    }
}

/// Pack an LBA into the 3-byte CHS-in-MBR encoding
/// (`cccccccc hhhhhhhh ssssssss` with 10-bit sector field split across byte 1).
fn lba_to_chs(lba: u32, heads: u32, sectors_per_track: u32) -> [u8;3] {
    if heads == 0 || sectors_per_track == 0 {
        debug!("degenerate geometry for CHS encoding, clamping to 0");
        return [0,1,0];
    }
    let c = lba / (heads * sectors_per_track);
    let h = (lba / sectors_per_track) % heads;
    let s = (lba % sectors_per_track) + 1;
    let c = c.min(1023);
    [h as u8, (((c >> 8) as u8) << 6) | (s as u8 & 0x3f), (c & 0xff) as u8]
}
