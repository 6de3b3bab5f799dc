//! ### FAT Volume Builder
//!
//! Synthesizes a fresh FAT12/FAT16 volume from an ordered host
//! file-descriptor tree: BPB template selection, FAT cluster-chain
//! assignment, root directory, and clustered file data, optionally
//! preceded by a single-partition MBR. Grounded on the teacher's
//! `fs::fat::pack` for date packing and on `bios::bpb`'s template table
//! for geometry, generalized to the two-pass depth-first layout this
//! engine's synthesis direction needs (the teacher only ever reads FAT
//! volumes, never writes one from a host tree).

use chrono::NaiveDateTime;
use log::warn;

use crate::bpb::{self,BPBFoundation,BootSector};
use crate::mbr;
use crate::image::{DiskImage,ParseOptions};
use crate::image::from_buffer::build_from_buffer;
use super::cell;
use super::directory::{self,DirEntry};
use super::Error;

/// One host-supplied file or directory to pack into the synthesized volume.
/// Directories carry `children`; files carry `data`. Empty files (`data`
/// empty) end up with `startCluster = 0` per the spec's builder algorithm.
#[derive(Clone)]
pub struct HostEntry {
    pub name: String,
    pub attr: u8,
    pub date: Option<NaiveDateTime>,
    pub data: Vec<u8>,
    pub children: Option<Vec<HostEntry>>
}

impl HostEntry {
    pub fn file(name: impl Into<String>, date: Option<NaiveDateTime>, data: Vec<u8>) -> Self {
        Self { name: name.into(), attr: directory::ARCHIVE, date, data, children: None }
    }
    pub fn dir(name: impl Into<String>, date: Option<NaiveDateTime>, children: Vec<HostEntry>) -> Self {
        Self { name: name.into(), attr: directory::SUBDIR, date, data: Vec::new(), children: Some(children) }
    }
    fn is_dir(&self) -> bool { self.children.is_some() }
}

fn round_up(n: u64, unit: u64) -> u64 {
    if unit == 0 { n } else { (n + unit - 1) / unit * unit }
}

/// Step 1: total byte requirement of the tree at the given cluster size.
/// Directory entries cost `(childCount+2)*32` bytes, rounded up to a
/// cluster; files cost their data length rounded up to a cluster (0 for
/// an empty file, since those get `startCluster = 0` and occupy nothing).
fn total_size(entries: &[HostEntry], clus_bytes: u64) -> u64 {
    let mut total = 0u64;
    for e in entries {
        if let Some(children) = &e.children {
            let dir_bytes = (children.len() as u64 + 2) * 32;
            total += round_up(dir_bytes,clus_bytes);
            total += total_size(children,clus_bytes);
        } else if !e.data.is_empty() {
            total += round_up(e.data.len() as u64,clus_bytes);
        }
    }
    total
}

/// Step 2: select the first BPB template whose media class matches the
/// requested capacity and whose root directory / data area both fit the
/// file set.
fn select_template(files: &[HostEntry], target_kb: Option<u64>) -> Result<&'static bpb::Template,Error> {
    let want_fixed = target_kb.map(|kb| kb >= 10000).unwrap_or(false);
    for tmpl in bpb::TEMPLATES.iter() {
        let is_fixed = tmpl.bpb.media == bpb::MEDIA_FIXED;
        if is_fixed != want_fixed {
            continue;
        }
        if tmpl.bpb.root_dir_entries() < files.len() as u64 {
            continue;
        }
        let hidden = tmpl.bpb.hidden_secs();
        if let Some(kb) = target_kb {
            if hidden > 0 && tmpl.bpb.tot_sec() != kb*2 {
                continue;
            }
        }
        let clus_bytes = tmpl.bpb.cluster_bytes();
        let needed = total_size(files,clus_bytes);
        let data_bytes = tmpl.bpb.data_rgn_secs() * tmpl.bpb.sec_size();
        if needed <= data_bytes {
            return Ok(tmpl);
        }
    }
    Err(Error::NoFittingTemplate)
}

/// A node's assigned starting cluster and cluster count, threaded through
/// the two FAT-building passes and the data-writing pass so each can walk
/// the tree in the same depth-first order.
struct Assignment {
    start_cluster: usize,
    n_clusters: usize
}

fn clusters_needed(size: u64, clus_bytes: u64) -> usize {
    if size == 0 { 0 } else { round_up(size,clus_bytes) as usize / clus_bytes.max(1) as usize }
}

/// Step 6: depth-first two-pass cluster assignment. Pass one walks the
/// whole tree assigning each non-empty node a contiguous cluster run and
/// writing its chain (each cluster pointing to the next, last to EOC).
/// Files are flattened into `assignments` in the same pre-order the data
/// pass and directory pass will both replay.
fn assign_clusters(entries: &[HostEntry], next_free: &mut usize, clus_bytes: u64, bits: u32, fat_buf: &mut [u8], assignments: &mut Vec<Option<Assignment>>) {
    for e in entries {
        let size = if let Some(children) = &e.children {
            (children.len() as u64 + 2) * 32
        } else {
            e.data.len() as u64
        };
        if size == 0 {
            assignments.push(None);
        } else {
            let n = clusters_needed(size,clus_bytes).max(1);
            let start = *next_free;
            for i in 0..n {
                let cluster = start + i;
                if i+1 < n {
                    cell::set(cluster,(start+i+1) as u32,bits,fat_buf);
                } else {
                    cell::set_eoc(cluster,bits,fat_buf);
                }
            }
            *next_free += n;
            assignments.push(Some(Assignment { start_cluster: start, n_clusters: n }));
        }
        if let Some(children) = &e.children {
            assign_clusters(children,next_free,clus_bytes,bits,fat_buf,assignments);
        }
    }
}

/// Step 9 continuation: write directory entries and file data in the same
/// pre-order `assign_clusters` used, consuming one `Assignment` per node
/// (and, for directories, the flattened assignments of all descendants).
struct Writer<'a> {
    buffer: &'a mut [u8],
    vba_data: u64,
    clus_secs: u64,
    cb_sector: u64,
    assignments: std::slice::Iter<'a,Option<Assignment>>
}

impl<'a> Writer<'a> {
    fn cluster_byte_offset(&self, cluster: usize) -> usize {
        let vba = self.vba_data + (cluster as u64 - 2)*self.clus_secs;
        (vba * self.cb_sector) as usize
    }

    fn write_dir_entries(&mut self, rows: &[(String,String,u8,[u8;2],[u8;2],usize,u32)], at_offset: usize) {
        for (i,(name,ext,attr,mtime,mdate,cluster,size)) in rows.iter().enumerate() {
            let off = at_offset + i*directory::DIR_ENTRY_SIZE;
            let mut nm = [0x20u8;8];
            let mut xt = [0x20u8;3];
            for (j,b) in name.as_bytes().iter().take(8).enumerate() { nm[j] = *b; }
            for (j,b) in ext.as_bytes().iter().take(3).enumerate() { xt[j] = *b; }
            let entry = DirEntry {
                name: nm, ext: xt, attr: *attr, reserved: [0;10],
                mod_time: *mtime, mod_date: *mdate,
                cluster1: (*cluster as u16).to_le_bytes(), file_size: size.to_le_bytes()
            };
            self.buffer[off..off+directory::DIR_ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        }
    }

    /// Walk `entries` in the same pre-order `assign_clusters` used: each
    /// node's own assignment is consumed, then (for a directory) its
    /// children are recursed into immediately, before moving on to the
    /// next sibling. The directory block itself is only written once all
    /// of its children's rows have been computed.
    fn write_tree(&mut self, entries: &[HostEntry], self_cluster: usize, parent_cluster: usize, root_offset: Option<usize>, self_date: Option<NaiveDateTime>) {
        let default_date = || chrono::NaiveDate::from_ymd_opt(1980,1,1).unwrap().and_hms_opt(0,0,0).unwrap();
        let mut rows = Vec::new();
        if root_offset.is_none() {
            let now = self_date.unwrap_or_else(default_date);
            rows.push((".".to_string(),String::new(),directory::SUBDIR,directory::pack_time(now),directory::pack_date(now),self_cluster,0));
            rows.push(("..".to_string(),String::new(),directory::SUBDIR,directory::pack_time(now),directory::pack_date(now),parent_cluster,0));
        }

        for e in entries {
            let assignment = self.assignments.next().expect("assignment stream exhausted");
            let short = directory::to_short_name(&e.name);
            let mut it = short.rsplitn(2,'.');
            let (base,ext) = match (it.next(),it.next()) {
                (Some(x),Some(b)) => (b.to_string(),x.to_string()),
                _ => (short.clone(),String::new())
            };
            let date = e.date.unwrap_or_else(default_date);
            let cluster = assignment.as_ref().map(|a| a.start_cluster).unwrap_or(0);
            let size = if e.is_dir() { 0 } else { e.data.len() as u32 };
            rows.push((base,ext,e.attr,directory::pack_time(date),directory::pack_date(date),cluster,size));

            if e.is_dir() {
                let a = assignment.as_ref().expect("a directory's size is never 0");
                let children = e.children.as_ref().expect("checked is_dir above");
                self.write_tree(children,a.start_cluster,self_cluster,None,e.date);
            } else if let Some(a) = assignment {
                if !e.data.is_empty() {
                    let mut remaining = &e.data[..];
                    for i in 0..a.n_clusters {
                        let off = self.cluster_byte_offset(a.start_cluster+i);
                        let take = remaining.len().min((self.clus_secs*self.cb_sector) as usize);
                        self.buffer[off..off+take].copy_from_slice(&remaining[..take]);
                        remaining = &remaining[take..];
                    }
                }
            }
        }

        let dir_offset = match root_offset {
            Some(off) => off,
            None => self.cluster_byte_offset(self_cluster)
        };
        self.write_dir_entries(&rows,dir_offset);
    }
}

/// Build a fresh FAT volume from `files`, optionally targeting a specific
/// capacity in KB, then re-parse the resulting buffer through
/// `build_from_buffer` to validate and populate the sector grid (step 10).
pub fn build_from_files(files: &[HostEntry], target_kb: Option<u64>) -> Result<DiskImage,Error> {
    let tmpl = select_template(files,target_kb)?;
    let bpbf: BPBFoundation = tmpl.bpb;
    let cb_sector = bpbf.sec_size();
    let clus_bytes = bpbf.cluster_bytes();
    let hidden = bpbf.hidden_secs();
    let heads = bpbf.heads();
    let spt = bpbf.secs_per_track();
    let total_sectors = bpbf.tot_sec();

    let band = hidden + spt*heads;
    let buf_len = ((band + total_sectors) * cb_sector) as usize;
    let mut buffer = vec![0u8;buf_len];

    // Step 4: MBR, if this volume sits behind a hidden-sector reserve.
    if hidden > 0 {
        let entry = mbr::single_fat12_entry(total_sectors as u32,heads as u32,spt as u32,hidden as u32);
        let entries = [
            mbr::PartitionEntry { status:0, chs_first:[0,1,0], kind:0, chs_last:[0,1,0], lba_first:0, lba_total:0 },
            mbr::PartitionEntry { status:0, chs_first:[0,1,0], kind:0, chs_last:[0,1,0], lba_first:0, lba_total:0 },
            mbr::PartitionEntry { status:0, chs_first:[0,1,0], kind:0, chs_last:[0,1,0], lba_first:0, lba_total:0 },
            entry];
        mbr::write_table(&mut buffer[0..512],&entries);
    }

    let vol_off = (hidden * cb_sector) as usize;

    // Step 5: boot sector.
    let boot_sector = BootSector::from_template(bpbf,cb_sector as usize);
    let boot_bytes = boot_sector.to_bytes();
    buffer[vol_off..vol_off+boot_bytes.len()].copy_from_slice(&boot_bytes);

    // Step 6: FAT cluster assignment.
    let fat_off = vol_off + (bpbf.res_secs() as usize)*(cb_sector as usize);
    let fat_len = (bpbf.fat_secs()*cb_sector) as usize;
    let bits = bpbf.fat_bits();
    let mut fat_image = vec![0u8;fat_len];
    cell::set_media_cell0(bits,bpbf.media,&mut fat_image);

    let mut next_free = cell::FIRST_DATA_CLUSTER;
    let mut assignments = Vec::new();
    assign_clusters(files,&mut next_free,clus_bytes,bits,&mut fat_image,&mut assignments);

    if (next_free - cell::FIRST_DATA_CLUSTER) as u64 > bpbf.cluster_total() {
        return Err(Error::NoFittingTemplate);
    }

    // Step 7: write every FAT copy.
    for copy in 0..bpbf.num_fats() as usize {
        let off = fat_off + copy*fat_len;
        buffer[off..off+fat_len].copy_from_slice(&fat_image);
    }

    // Step 8: root directory region, 0xE5-padded.
    let root_off = fat_off + (bpbf.num_fats() as usize)*fat_len;
    let root_len = (bpbf.root_dir_secs()*cb_sector) as usize;
    for b in buffer[root_off..root_off+root_len].iter_mut() {
        *b = directory::FREE;
    }

    // Step 9: write directory entries and file data, depth-first.
    let vba_data = bpbf.res_secs() as u64 + bpbf.num_fats()*bpbf.fat_secs() + bpbf.root_dir_secs();
    {
        let mut writer = Writer {
            buffer: &mut buffer[vol_off..],
            vba_data,
            clus_secs: bpbf.sec_per_clus() as u64,
            cb_sector,
            assignments: assignments.iter()
        };
        writer.write_tree(files,0,0,Some(root_off - vol_off),None);
    }

    if hidden > 0 {
        // replicate the boot-cylinder MBR across the hidden band
        let mbr_sector = buffer[0..512].to_vec();
        let mut off = 512usize;
        while off + 512 <= vol_off {
            buffer[off..off+512].copy_from_slice(&mbr_sector);
            off += 512;
        }
    }

    // Step 10: re-parse to validate and populate the sector grid.
    build_from_buffer(&buffer,&ParseOptions::default()).map_err(|e| {
        warn!("synthesized volume failed to re-parse: {}",e);
        Error::ImpossiblePartition
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_single_small_file() {
        let files = vec![HostEntry::file("HELLO.TXT",None,b"Hello, world!".to_vec())];
        let img = build_from_files(&files,Some(160)).unwrap();
        assert_eq!(img.geometry.media_id,bpb::MEDIA_160K);
        let data = img.get_data();
        let root_off = 512 + 2*512;
        assert_eq!(&data[root_off..root_off+8],b"HELLO   ");
    }

    #[test]
    fn test_rejects_file_set_too_large_for_any_template() {
        let files = vec![HostEntry::file("BIG.BIN",None,vec![0u8;3_000_000])];
        assert!(matches!(build_from_files(&files,Some(160)),Err(Error::NoFittingTemplate)));
    }

    #[test]
    fn test_fixed_disk_target_synthesizes_mbr_and_partition() {
        let files = vec![HostEntry::file("HELLO.TXT",None,b"Hello, world!".to_vec())];
        let img = build_from_files(&files,Some(10012)).unwrap();
        assert_eq!(img.geometry.media_id,bpb::MEDIA_FIXED);
        let data = img.get_data();
        let table = mbr::read_table(&data[0..512]).unwrap();
        assert!(table[3].is_active());
        assert!(table[3].is_fat());
        assert_eq!(table[3].lba_first,2);
        let root_off = 1536 + 2*32*512;
        assert_eq!(&data[root_off..root_off+8],b"HELLO   ");
    }
}
