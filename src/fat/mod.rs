//! ## FAT Volume Module
//!
//! FAT12/FAT16 volume decoding and synthesis, split the way the teacher
//! splits its own FAT support across `bios::fat` (cell access) and
//! `fs::fat::{directory,pack}` (entries, dates, names), plus two new
//! modules for the asymmetric read/write directions this engine actually
//! needs: `decode` walks an existing volume into a file table, `build`
//! synthesizes a fresh one from a host file-descriptor tree.

pub mod cell;
pub mod directory;
pub mod decode;
pub mod build;

use thiserror::Error;

#[derive(Error,Debug)]
pub enum Error {
    #[error("cannot locate a boot sector for this volume")]
    NoBootSector,
    #[error("partition table produces an impossible BPB")]
    ImpossiblePartition,
    #[error("file set exceeds any supported BPB template")]
    NoFittingTemplate,
    #[error("directory contains a duplicate file name")]
    DuplicateFile,
    #[error("too many unreadable file names in this directory")]
    TooManyBadNames,
    #[error("disk is not writable")]
    NotWritable
}

/// One FAT volume's identity and layout, per spec §3.
#[derive(Clone,Debug)]
pub struct VolInfo {
    pub i_volume: usize,
    /// -1 = unpartitioned
    pub i_partition: i32,
    pub id_media: u8,
    pub lba_start: u64,
    pub lba_total: u64,
    pub n_fat_bits: u32,
    pub vba_fat: u64,
    pub vba_root: u64,
    pub vba_data: u64,
    pub n_entries: u64,
    pub clus_secs: u64,
    pub clus_max: u64,
    pub clus_bad: u64,
    pub clus_free: u64,
    pub clus_total: u64,
    pub cb_sector: u64
}

/// One file or directory found by the decoder, per spec §3.
#[derive(Clone,Debug)]
pub struct FileInfo {
    pub i_volume: usize,
    /// backslash-separated, rooted at `"\\"`
    pub path: String,
    pub name: String,
    pub attr: u8,
    pub date: Option<chrono::NaiveDateTime>,
    pub size: usize,
    pub start_cluster: usize,
    /// ordered LBAs of every sector occupied by the file
    pub a_lba: Vec<u64>
}

impl FileInfo {
    pub fn is_dir(&self) -> bool { self.attr & directory::SUBDIR != 0 }
    pub fn is_hidden(&self) -> bool { self.attr & directory::HIDDEN != 0 }
    pub fn is_volume_label(&self) -> bool { self.attr & directory::VOLUME_ID != 0 }
}
