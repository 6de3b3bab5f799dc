//! ## Disk Image Module
//!
//! `DiskImage` owns the sector grid and nominal geometry, and is the
//! object every other component is reached from: the parsers build one,
//! the FAT decoder/builder populate and consume its volume/file tables,
//! the presenters read it, and `runtime` seeks/reads/writes through it.
//! Modeled on the shape of the teacher's `img::DiskImage` trait, but as a
//! concrete struct: this engine has one sector-grid representation, not a
//! family of track-encoding schemes to abstract over.

pub mod from_buffer;
pub mod from_json;
pub mod psi;

use thiserror::Error;
use log::{warn,debug};

use crate::sector::Sector;
use crate::geometry::DiskGeometry;
use crate::fat::{VolInfo,FileInfo};

#[derive(Error,Debug)]
pub enum Error {
    #[error("buffer too short to resolve any geometry")]
    UnresolvableGeometry,
    #[error("sector ({0},{1},{2}) not found on this image")]
    SectorNotFound(usize,usize,usize),
    #[error("malformed JSON image: {0}")]
    MalformedJson(String),
    #[error("malformed PSI stream: {0}")]
    MalformedPsi(String)
}

#[derive(Clone,Copy,Debug,Default)]
pub struct ParseOptions {
    pub resolve: crate::geometry::ResolveOptions,
    /// `(cylinder, head, sector_index, new_id)` overrides applied after
    /// the raw-buffer grid is built.
    pub sector_id_overrides: &'static [(usize,usize,usize,usize)],
    /// `(cylinder, head, sector_index, error_byte)` overrides; installs a
    /// forced read error on the addressed sector.
    pub sector_error_overrides: &'static [(usize,usize,usize,i32)]
}

/// The decoded sector grid plus whatever FAT volume/file tables have been
/// built against it. `disk_data[cylinder][head]` is a vector of sectors in
/// on-disk (not necessarily numeric) order, since copy-protected and XDF
/// media need not keep sectors sorted by id.
pub struct DiskImage {
    disk_data: Vec<Vec<Vec<Sector>>>,
    pub geometry: DiskGeometry,
    pub xdf: bool,
    pub name: Option<String>,
    /// Captured original BPB bytes `(offset, bytes)` when geometry
    /// resolution rewrote the on-disk BPB, so `get_data` can restore them.
    pub original_bpb: Option<(usize,Vec<u8>)>,
    pub bpb_modified: bool,
    pub vol_info: Vec<VolInfo>,
    pub file_info: Vec<FileInfo>
}

impl DiskImage {
    pub fn new(geometry: DiskGeometry) -> Self {
        let mut disk_data = Vec::with_capacity(geometry.cylinders);
        for _c in 0..geometry.cylinders {
            let mut heads = Vec::with_capacity(geometry.heads);
            for _h in 0..geometry.heads {
                heads.push(Vec::new());
            }
            disk_data.push(heads);
        }
        Self {
            disk_data,
            geometry,
            xdf: false,
            name: None,
            original_bpb: None,
            bpb_modified: false,
            vol_info: Vec::new(),
            file_info: Vec::new()
        }
    }

    pub fn cylinder_count(&self) -> usize { self.disk_data.len() }
    pub fn head_count(&self, c: usize) -> usize { self.disk_data.get(c).map(|h| h.len()).unwrap_or(0) }
    pub fn sector_count(&self, c: usize, h: usize) -> usize {
        self.disk_data.get(c).and_then(|t| t.get(h)).map(|s| s.len()).unwrap_or(0)
    }

    pub fn track(&self, c: usize, h: usize) -> &[Sector] {
        &self.disk_data[c][h]
    }
    pub fn track_mut(&mut self, c: usize, h: usize) -> &mut Vec<Sector> {
        &mut self.disk_data[c][h]
    }

    pub fn push_sector(&mut self, c: usize, h: usize, sector: Sector) {
        while self.disk_data.len() <= c {
            self.disk_data.push(Vec::new());
        }
        while self.disk_data[c].len() <= h {
            self.disk_data[c].push(Vec::new());
        }
        self.disk_data[c][h].push(sector);
    }

    /// Find a sector by its logical id within a track, by linear scan
    /// (sectors need not be numerically sorted).
    pub fn find_sector(&self, c: usize, h: usize, id: usize) -> Option<&Sector> {
        self.disk_data.get(c)?.get(h)?.iter().find(|s| s.id() == id)
    }
    pub fn find_sector_mut(&mut self, c: usize, h: usize, id: usize) -> Option<&mut Sector> {
        self.disk_data.get_mut(c)?.get_mut(h)?.iter_mut().find(|s| s.id() == id)
    }

    /// Convert a volume-relative LBA into the CHS address this image
    /// actually stores it at, using the nominal geometry.
    pub fn lba_to_chs(&self, lba: u64) -> (usize,usize,usize) {
        let spt = self.geometry.sectors_per_track.max(1) as u64;
        let heads = self.geometry.heads.max(1) as u64;
        let c = lba / (spt*heads);
        let h = (lba / spt) % heads;
        let s_index = lba % spt;
        (c as usize, h as usize, s_index as usize)
    }

    /// Fetch the sector holding LBA `lba`, assuming sector ids run
    /// contiguously `1..=sectors_per_track` within each track.
    pub fn sector_at_lba(&self, lba: u64) -> Option<&Sector> {
        let (c,h,idx) = self.lba_to_chs(lba);
        self.disk_data.get(c)?.get(h)?.get(idx)
    }
    pub fn sector_at_lba_mut(&mut self, lba: u64) -> Option<&mut Sector> {
        let (c,h,idx) = self.lba_to_chs(lba);
        self.disk_data.get_mut(c)?.get_mut(h)?.get_mut(idx)
    }

    /// Serialize the sector grid back into one contiguous buffer, in CHS
    /// order, restoring the captured original BPB bytes if geometry
    /// resolution had rewritten them.
    pub fn get_data(&self) -> Vec<u8> {
        let mut ans = Vec::new();
        for track in &self.disk_data {
            for head in track {
                for sector in head {
                    ans.extend_from_slice(&sector.to_bytes());
                }
            }
        }
        if let Some((offset,original)) = &self.original_bpb {
            if *offset + original.len() <= ans.len() {
                ans[*offset..*offset+original.len()].copy_from_slice(original);
            } else {
                warn!("captured BPB bytes no longer fit the serialized image");
            }
        }
        ans
    }

    /// The image-wide checksum: the two's-complement sum of every
    /// sector's checksum contribution, in grid iteration order.
    pub fn checksum(&self) -> u32 {
        crate::sector::image_checksum(self.disk_data.iter().flatten().flatten())
    }

    /// Discard the volume/file tables and every sector's file
    /// back-reference and modify marker. Idempotent.
    pub fn delete_tables(&mut self) {
        debug!("discarding {} volume(s) and {} file(s)",self.vol_info.len(),self.file_info.len());
        self.vol_info.clear();
        self.file_info.clear();
        for track in self.disk_data.iter_mut() {
            for head in track.iter_mut() {
                for sector in head.iter_mut() {
                    sector.clear_file_ref();
                    sector.clear_modify();
                }
            }
        }
    }

    /// Rebuild the volume/file tables by walking every FAT volume this
    /// image contains, per `fat::decode::decode_volumes`.
    pub fn build_tables(&mut self) -> Result<(),crate::fat::Error> {
        self.delete_tables();
        let (vols,files) = crate::fat::decode::decode_volumes(self)?;
        self.vol_info = vols;
        self.file_info = files;
        Ok(())
    }
}
