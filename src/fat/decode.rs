//! ### FAT Volume Decoder
//!
//! Walks MBR partitions (if present), the BPB, FAT cluster chains, and
//! directory trees, building a global file table with sector-to-file
//! back-references. Grounded on the teacher's `fs::fat` directory walk
//! and `bios::fat`'s cluster-chain walker, generalized to the two-phase
//! MBR partition scan this engine needs and rewritten against
//! `fat::cell`'s single-word-fetch accessor rather than the teacher's
//! byte-pair fetch.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use log::warn;

use crate::bpb::{self,BPBFoundation};
use crate::mbr;
use crate::image::DiskImage;
use super::cell;
use super::directory::{self,DirEntry};
use super::{Error,VolInfo,FileInfo};

const MAX_SCAN_ITERATIONS: usize = 48;
const MAX_ENTRIES_PER_PHASE: usize = 4;

fn recognized_media(id: u8) -> bool {
    matches!(id,
        bpb::MEDIA_160K | bpb::MEDIA_180K | bpb::MEDIA_320K | bpb::MEDIA_360K |
        bpb::MEDIA_720_1200K | bpb::MEDIA_1440_2880K | bpb::MEDIA_FIXED)
}

/// A volume's BPB plus the derived `VolInfo`, kept together only for the
/// duration of decoding one volume's directory tree.
struct Layout {
    bpb: BPBFoundation,
    vol: VolInfo
}

fn layout_from_bpb(i_volume: usize, i_partition: i32, lba_start: u64, bpb: BPBFoundation) -> Layout {
    let cb_sector = bpb.sec_size();
    let vba_fat = bpb.res_secs() as u64;
    let vba_root = vba_fat + bpb.num_fats()*bpb.fat_secs();
    let vba_data = vba_root + bpb.root_dir_secs();
    let clus_total = bpb.cluster_total();
    let vol = VolInfo {
        i_volume, i_partition,
        id_media: bpb.media,
        lba_start,
        lba_total: bpb.tot_sec(),
        n_fat_bits: bpb.fat_bits(),
        vba_fat, vba_root, vba_data,
        n_entries: bpb.root_dir_entries(),
        clus_secs: bpb.sec_per_clus() as u64,
        clus_max: clus_total + 1,
        clus_bad: 0,
        clus_free: 0,
        clus_total,
        cb_sector
    };
    Layout { bpb, vol }
}

fn fat_slice<'a>(buffer: &'a [u8], layout: &Layout) -> Option<&'a [u8]> {
    let start = ((layout.vol.lba_start + layout.vol.vba_fat) * layout.vol.cb_sector) as usize;
    let len = (layout.bpb.fat_secs() * layout.vol.cb_sector) as usize;
    buffer.get(start..start+len)
}

/// Free/bad cluster accounting over `[2, clusMax]` (spec §4.4).
fn classify_fat(buffer: &[u8], layout: &Layout) -> (u64,u64) {
    let fat_buf = match fat_slice(buffer,layout) {
        Some(b) => b,
        None => return (0,0)
    };
    let bits = layout.vol.n_fat_bits;
    let mut bad = 0u64;
    let mut free = 0u64;
    for c in 2..=layout.vol.clus_max {
        if cell::is_free(c as usize,bits,fat_buf) {
            free += 1;
        } else if cell::is_bad(c as usize,bits,fat_buf) {
            bad += 1;
        }
    }
    (bad,free)
}

/// Walk the cluster chain starting at `start_cluster`, returning the
/// ordered disk-wide LBAs it occupies. Warns (does not fail) on an
/// invalid cluster encountered mid-chain or on a chain cycle.
fn cluster_chain(buffer: &[u8], layout: &Layout, start_cluster: usize) -> Vec<u64> {
    let fat_buf = match fat_slice(buffer,layout) {
        Some(b) => b,
        None => return Vec::new()
    };
    let bits = layout.vol.n_fat_bits;
    let eoc_min = if bits == 12 { cell::EOC12_MIN } else { cell::EOC16_MIN };
    let mut lbas = Vec::new();
    let mut cluster = start_cluster as u64;
    let mut seen = HashSet::new();
    loop {
        if cluster < cell::FIRST_DATA_CLUSTER as u64 || cluster > layout.vol.clus_max {
            if !lbas.is_empty() {
                warn!("invalid cluster {} encountered mid-chain",cluster);
            }
            break;
        }
        if cell::is_bad(cluster as usize,bits,fat_buf) {
            warn!("chain references bad cluster {}",cluster);
            break;
        }
        if !seen.insert(cluster) {
            warn!("cluster chain cycle detected at cluster {}",cluster);
            break;
        }
        let vba = layout.vol.vba_data + (cluster - 2)*layout.vol.clus_secs;
        for s in 0..layout.vol.clus_secs {
            lbas.push(layout.vol.lba_start + vba + s);
        }
        let next = cell::get(cluster as usize,bits,fat_buf) as u64;
        if next >= eoc_min {
            break;
        }
        cluster = next;
    }
    lbas
}

/// Recursively walk a directory's sector list, appending a `FileInfo` for
/// each live entry and writing sector-to-file back-references. Recurses
/// into subdirectories (skipping `.`/`..`) before returning.
fn walk_directory(buffer: &[u8], image: &mut DiskImage, layout: &Layout, sector_lbas: &[u64], path: &str, files: &mut Vec<FileInfo>) -> Result<(),Error> {
    let cb_sector = layout.vol.cb_sector as usize;
    let mut bad_names = 0usize;
    let mut subdirs: Vec<(String,Vec<u64>)> = Vec::new();

    'outer: for &lba in sector_lbas {
        let off = (lba * cb_sector as u64) as usize;
        let sector_bytes = match buffer.get(off..off+cb_sector) {
            Some(b) => b,
            None => continue
        };
        for chunk in sector_bytes.chunks(directory::DIR_ENTRY_SIZE) {
            if chunk.len() < directory::DIR_ENTRY_SIZE {
                continue;
            }
            if chunk[0] == 0x00 {
                break 'outer;
            }
            if chunk[0] == 0xe5 {
                continue;
            }
            let entry = DirEntry::from_bytes(&chunk.to_vec());
            let (base,_ext) = entry.name_string();
            if base == "." || base == ".." {
                continue;
            }
            let name = directory::file_name_to_string(entry.name,entry.ext);
            if name.trim().is_empty() {
                bad_names += 1;
                if bad_names > 16 {
                    return Err(Error::TooManyBadNames);
                }
                continue;
            }

            let date = directory::unpack_date(entry.mod_date)
                .and_then(|d| directory::unpack_time(entry.mod_time).map(|t| NaiveDateTime::new(d,t)));
            let start_cluster = entry.cluster1();
            let size = entry.size();
            let is_dir = entry.attr(directory::SUBDIR);
            let a_lba = if start_cluster >= cell::FIRST_DATA_CLUSTER {
                cluster_chain(buffer,layout,start_cluster)
            } else {
                Vec::new()
            };

            let file_index = files.len();
            for (idx,&data_lba) in a_lba.iter().enumerate() {
                if let Some(sec) = image.sector_at_lba_mut(data_lba) {
                    if sec.file_info().is_some() {
                        warn!("sector at LBA {} cross-linked between files",data_lba);
                    }
                    sec.set_file_ref(Some(file_index),Some(idx*cb_sector));
                }
            }

            let full_path = format!("{}{}",path,name);
            files.push(FileInfo {
                i_volume: layout.vol.i_volume,
                path: path.to_string(),
                name,
                attr: entry.attr,
                date,
                size,
                start_cluster,
                a_lba: a_lba.clone()
            });

            if is_dir && start_cluster >= cell::FIRST_DATA_CLUSTER {
                subdirs.push((format!("{}\\",full_path),a_lba));
            }
        }
    }

    for (subpath,lbas) in subdirs {
        walk_directory(buffer,image,layout,&lbas,&subpath,files)?;
    }
    Ok(())
}

/// Unpartitioned volume 0: trust the on-disk BPB when it looks plausible
/// for this buffer, otherwise search the default-BPB template table by
/// the first FAT sector's media byte and whole-disk size.
fn decode_volume_0(buffer: &[u8], image: &mut DiskImage, vols: &mut Vec<VolInfo>, files: &mut Vec<FileInfo>) -> Result<(),Error> {
    if buffer.len() < 512 {
        return Err(Error::NoBootSector);
    }
    let cb_sector = image.geometry.bytes_per_sector.max(1) as u64;
    let on_disk = BPBFoundation::from_bytes(&buffer[11..36].to_vec());

    let bpb = if on_disk.sec_size() == cb_sector && recognized_media(on_disk.media) {
        on_disk
    } else {
        warn!("volume 0 boot sector unrecognized, searching default BPB templates");
        let fat_byte = buffer.get((on_disk.res_secs() as u64 * cb_sector) as usize).copied().unwrap_or(0);
        bpb::TEMPLATES.iter()
            .find(|t| t.bpb.media == fat_byte && bpb::template_buffer_len(&t.bpb) as usize == buffer.len())
            .map(|t| t.bpb)
            .ok_or(Error::NoBootSector)?
    };

    let mut layout = layout_from_bpb(0,-1,0,bpb);
    let (bad,free) = classify_fat(buffer,&layout);
    layout.vol.clus_bad = bad;
    layout.vol.clus_free = free;

    let root_lbas: Vec<u64> = (0..bpb.root_dir_secs()).map(|i| layout.vol.vba_root + i).collect();
    walk_directory(buffer,image,&layout,&root_lbas,"\\",files)?;
    vols.push(layout.vol);
    Ok(())
}

/// Partitioned case: two-phase MBR scan. Phase 0 picks up primary FAT12/16
/// entries directly. Phase 1 follows an EXTENDED entry chain, re-reading
/// the boot sector at the computed LBA and restarting the scan, bounded
/// by a circuit breaker on total iterations.
fn decode_partitioned(buffer: &[u8], image: &mut DiskImage, vols: &mut Vec<VolInfo>, files: &mut Vec<FileInfo>) -> Result<(),Error> {
    let cb_sector = image.geometry.bytes_per_sector.max(1) as u64;
    let mut mbr_lba = 0u64;
    let mut lba_extended: Option<u64> = None;
    let mut i_volume = 0usize;

    for _ in 0..MAX_SCAN_ITERATIONS {
        let mbr_off = (mbr_lba * cb_sector) as usize;
        let table = match buffer.get(mbr_off..mbr_off+512).and_then(|s| mbr::read_table(s).ok()) {
            Some(t) => t,
            None => {
                warn!("expected a partition table at LBA {}",mbr_lba);
                break;
            }
        };

        let mut next_extended = None;
        for (slot,entry) in table.iter().enumerate().take(MAX_ENTRIES_PER_PHASE) {
            if entry.is_fat() {
                let lba_start = mbr_lba + entry.lba_first as u64;
                let boot_off = (lba_start * cb_sector) as usize;
                let boot_bytes = match buffer.get(boot_off..boot_off+512) {
                    Some(b) => b,
                    None => { warn!("partition {} boot sector out of range",slot); continue; }
                };
                let part_bpb = BPBFoundation::from_bytes(&boot_bytes[11..36].to_vec());
                if !part_bpb.verify() {
                    return Err(Error::ImpossiblePartition);
                }
                let mut layout = layout_from_bpb(i_volume,slot as i32,lba_start,part_bpb);
                let (bad,free) = classify_fat(buffer,&layout);
                layout.vol.clus_bad = bad;
                layout.vol.clus_free = free;
                let root_lbas: Vec<u64> = (0..part_bpb.root_dir_secs())
                    .map(|i| lba_start + layout.vol.vba_root + i)
                    .collect();
                walk_directory(buffer,image,&layout,&root_lbas,"\\",files)?;
                vols.push(layout.vol);
                i_volume += 1;
            } else if entry.is_extended() && next_extended.is_none() {
                next_extended = Some(entry.lba_first as u64);
            }
        }

        match next_extended {
            Some(raw) => {
                mbr_lba = match lba_extended {
                    Some(base) => base + raw,
                    None => raw
                };
                lba_extended.get_or_insert(raw);
            }
            None => break
        }
    }

    if vols.is_empty() {
        return Err(Error::NoBootSector);
    }
    Ok(())
}

/// Build volume and file tables for every FAT volume found on `image`.
pub fn decode_volumes(image: &mut DiskImage) -> Result<(Vec<VolInfo>,Vec<FileInfo>),Error> {
    let buffer = image.get_data();
    let mut vols = Vec::new();
    let mut files = Vec::new();

    let partitioned = mbr::read_table(&buffer).ok()
        .map(|t| t.iter().any(|e| e.is_fat() || e.is_extended()))
        .unwrap_or(false);

    if partitioned {
        decode_partitioned(&buffer,image,&mut vols,&mut files)?;
    } else {
        decode_volume_0(&buffer,image,&mut vols,&mut files)?;
    }

    Ok((vols,files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ParseOptions;
    use crate::image::from_buffer::build_from_buffer;

    fn build_hello_txt_image() -> DiskImage {
        let tmpl = &bpb::TEMPLATES[0];
        let len = bpb::template_buffer_len(&tmpl.bpb) as usize;
        let mut buf = vec![0u8;len];
        let bs = crate::bpb::BootSector::from_template(tmpl.bpb,512);
        let sec = bs.to_bytes();
        buf[0..sec.len()].copy_from_slice(&sec);

        let bpbf = tmpl.bpb;
        let fat_off = bpbf.res_secs() as usize * 512;
        cell::set_media_cell0(bpbf.fat_bits(),bpbf.media,&mut buf[fat_off..fat_off+512]);
        cell::set(2,cell::EOC12_SET,bpbf.fat_bits(),&mut buf[fat_off..fat_off+512]);

        let root_off = fat_off + (bpbf.num_fats() as usize)*(bpbf.fat_secs() as usize)*512;
        let mut entry = vec![0x20u8;directory::DIR_ENTRY_SIZE];
        entry[0..8].copy_from_slice(b"HELLO   ");
        entry[8..11].copy_from_slice(b"TXT");
        entry[28..32].copy_from_slice(&13u32.to_le_bytes());
        entry[26..28].copy_from_slice(&2u16.to_le_bytes());
        buf[root_off..root_off+32].copy_from_slice(&entry);

        let data_off = root_off + (bpbf.root_dir_secs() as usize)*512;
        buf[data_off..data_off+13].copy_from_slice(b"Hello, world!");

        build_from_buffer(&buf,&ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_decode_single_file_root_directory() {
        let mut img = build_hello_txt_image();
        img.build_tables().unwrap();
        assert_eq!(img.vol_info.len(),1);
        assert_eq!(img.file_info.len(),1);
        let f = &img.file_info[0];
        assert_eq!(f.name,"HELLO.TXT");
        assert_eq!(f.size,13);
        assert_eq!(f.a_lba.len(),1);
    }

    /// A primary EXTENDED entry at absolute LBA 10, chaining to a single
    /// EBR whose FAT entry is 1 sector past it — so the volume's boot
    /// sector sits at absolute LBA 11, not 21. Exercises the first hop of
    /// the two-phase extended-partition scan, where the running
    /// `lba_extended` base must equal the first EBR's own LBA rather than
    /// double it.
    fn build_one_level_extended_chain() -> (Vec<u8>,DiskImage) {
        let tmpl = &bpb::TEMPLATES[0];
        let vol_len = bpb::template_buffer_len(&tmpl.bpb) as usize;
        let boot_lba = 11usize;
        let total_len = (boot_lba + 1)*512 + vol_len;
        let mut buf = vec![0u8;total_len];

        let primary = [
            mbr::PartitionEntry { status:0, chs_first:[0,1,0], kind:mbr::PARTITION_TYPE_EXTENDED, chs_last:[0,1,0], lba_first:10, lba_total:0 },
            mbr::PartitionEntry { status:0, chs_first:[0,1,0], kind:0, chs_last:[0,1,0], lba_first:0, lba_total:0 },
            mbr::PartitionEntry { status:0, chs_first:[0,1,0], kind:0, chs_last:[0,1,0], lba_first:0, lba_total:0 },
            mbr::PartitionEntry { status:0, chs_first:[0,1,0], kind:0, chs_last:[0,1,0], lba_first:0, lba_total:0 },
        ];
        mbr::write_table(&mut buf[0..512],&primary);

        let ebr_off = 10*512;
        let ebr = [
            mbr::PartitionEntry { status:0x80, chs_first:[0,1,0], kind:mbr::PARTITION_TYPE_FAT12, chs_last:[0,1,0], lba_first:1, lba_total:vol_len as u32/512 },
            mbr::PartitionEntry { status:0, chs_first:[0,1,0], kind:0, chs_last:[0,1,0], lba_first:0, lba_total:0 },
            mbr::PartitionEntry { status:0, chs_first:[0,1,0], kind:0, chs_last:[0,1,0], lba_first:0, lba_total:0 },
            mbr::PartitionEntry { status:0, chs_first:[0,1,0], kind:0, chs_last:[0,1,0], lba_first:0, lba_total:0 },
        ];
        mbr::write_table(&mut buf[ebr_off..ebr_off+512],&ebr);

        let bs = crate::bpb::BootSector::from_template(tmpl.bpb,512);
        let sec = bs.to_bytes();
        let boot_off = boot_lba*512;
        buf[boot_off..boot_off+sec.len()].copy_from_slice(&sec);

        let bpbf = tmpl.bpb;
        let fat_off = boot_off + bpbf.res_secs() as usize * 512;
        cell::set_media_cell0(bpbf.fat_bits(),bpbf.media,&mut buf[fat_off..fat_off+512]);
        cell::set(2,cell::EOC12_SET,bpbf.fat_bits(),&mut buf[fat_off..fat_off+512]);

        let root_off = fat_off + (bpbf.num_fats() as usize)*(bpbf.fat_secs() as usize)*512;
        let mut entry = vec![0x20u8;directory::DIR_ENTRY_SIZE];
        entry[0..8].copy_from_slice(b"HELLO   ");
        entry[8..11].copy_from_slice(b"TXT");
        entry[28..32].copy_from_slice(&13u32.to_le_bytes());
        entry[26..28].copy_from_slice(&2u16.to_le_bytes());
        buf[root_off..root_off+32].copy_from_slice(&entry);

        let data_off = root_off + (bpbf.root_dir_secs() as usize)*512;
        buf[data_off..data_off+13].copy_from_slice(b"Hello, world!");

        let geom = crate::geometry::DiskGeometry {
            cylinders: 1, heads: 1, sectors_per_track: total_len/512, bytes_per_sector: 512, media_id: bpbf.media
        };
        let mut image = DiskImage::new(geom);
        for (i,chunk) in buf.chunks(512).enumerate() {
            image.push_sector(0,0,crate::sector::Sector::from_buffer(0,0,i+1,512,chunk,0).unwrap());
        }
        (buf,image)
    }

    #[test]
    fn test_extended_partition_chain_uses_first_ebr_lba_directly() {
        let (buf,mut image) = build_one_level_extended_chain();
        let mut vols = Vec::new();
        let mut files = Vec::new();
        decode_partitioned(&buf,&mut image,&mut vols,&mut files).unwrap();
        assert_eq!(vols.len(),1);
        assert_eq!(vols[0].lba_start,11);
        assert_eq!(files.len(),1);
        assert_eq!(files[0].name,"HELLO.TXT");
    }

    #[test]
    fn test_delete_tables_clears_back_references() {
        let mut img = build_hello_txt_image();
        img.build_tables().unwrap();
        let lba = img.file_info[0].a_lba[0];
        assert!(img.sector_at_lba(lba).unwrap().file_info().is_some());
        img.delete_tables();
        assert!(img.sector_at_lba(lba).unwrap().file_info().is_none());
    }
}
