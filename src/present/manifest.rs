//! ### File manifest presenter
//!
//! A flat, whole-image table of every file the file table found,
//! independent of directory nesting: useful for diffing two images or
//! cataloguing disk contents without walking the tree by hand. Directories
//! and the volume label are excluded.
//!
//! The spec calls out `loadSymbols()` (EXE/DLL debug-symbol parsing) as a
//! call the core makes but a collaborator outside the core defines. That
//! is modeled here as a caller-supplied closure rather than a stub
//! function this crate would otherwise have to fake the body of.

use crate::image::DiskImage;
use crate::fat::FileInfo;

#[derive(Clone,Debug)]
pub struct ManifestEntry {
    pub path: String,
    pub name: String,
    pub size: usize,
    pub attr: u8,
    pub start_cluster: usize,
    pub symbols: Option<Vec<String>>
}

fn base_entries(image: &DiskImage) -> impl Iterator<Item=&FileInfo> {
    image.file_info.iter().filter(|f| !f.is_dir() && !f.is_volume_label())
}

/// Build the manifest with no symbol lookup performed.
pub fn build_manifest(image: &DiskImage) -> Vec<ManifestEntry> {
    base_entries(image).map(|f| ManifestEntry {
        path: f.path.clone(),
        name: f.name.clone(),
        size: f.size,
        attr: f.attr,
        start_cluster: f.start_cluster,
        symbols: None
    }).collect()
}

/// Build the manifest, calling `load_symbols` for every file so a
/// collaborator can attach whatever symbol table it is able to parse out
/// of that file's bytes. A closure returning `None` leaves that entry's
/// `symbols` field unset.
pub fn build_manifest_with_symbols(
    image: &DiskImage,
    load_symbols: impl Fn(&FileInfo) -> Option<Vec<String>>
) -> Vec<ManifestEntry> {
    base_entries(image).map(|f| ManifestEntry {
        path: f.path.clone(),
        name: f.name.clone(),
        size: f.size,
        attr: f.attr,
        start_cluster: f.start_cluster,
        symbols: load_symbols(f)
    }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DiskGeometry;

    fn sample_image() -> DiskImage {
        let mut img = DiskImage::new(DiskGeometry { cylinders: 1, heads: 1, sectors_per_track: 1, bytes_per_sector: 512, media_id: 0xf0 });
        img.file_info.push(FileInfo {
            i_volume: 0, path: "\\".to_string(), name: "README.TXT".to_string(),
            attr: 0, date: None, size: 42, start_cluster: 2, a_lba: vec![33]
        });
        img.file_info.push(FileInfo {
            i_volume: 0, path: "\\".to_string(), name: "SUBDIR".to_string(),
            attr: crate::fat::directory::SUBDIR, date: None, size: 0, start_cluster: 3, a_lba: vec![34]
        });
        img
    }

    #[test]
    fn test_manifest_excludes_directories() {
        let img = sample_image();
        let manifest = build_manifest(&img);
        assert_eq!(manifest.len(),1);
        assert_eq!(manifest[0].name,"README.TXT");
    }

    #[test]
    fn test_manifest_with_symbols_invokes_closure() {
        let img = sample_image();
        let manifest = build_manifest_with_symbols(&img,|f| {
            if f.name.ends_with(".TXT") { Some(vec!["main".to_string()]) } else { None }
        });
        assert_eq!(manifest[0].symbols,Some(vec!["main".to_string()]));
    }
}
