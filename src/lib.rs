//! # `pcedisk`
//!
//! A library for reading, constructing, and re-emitting floppy and
//! fixed-disk images used by early PC-compatible operating systems.
//!
//! ## Architecture
//!
//! The engine is built around one owned object, `image::DiskImage`, which
//! holds a `(cylinder, head, sector)` grid of `sector::Sector`s plus
//! whatever FAT volume/file tables `fat::decode` has populated onto it.
//! Three entry points build a `DiskImage` from different sources
//! (`image::from_buffer`, `image::from_json`, `image::psi`); one more
//! (`fat::build`) synthesizes a fresh volume from a host file tree. All
//! four converge on the same shared post-processing step exposed here as
//! `open_image`: parse, then attempt `build_tables()`.
//!
//! ## Modules
//!
//! * `byteview` — endian-aware read/write views over a byte slice.
//! * `sector` — the sector codec: run-length compression, checksums,
//!   modify-range tracking.
//! * `bpb` / `mbr` — on-disk BIOS Parameter Block and partition-table
//!   structures, plus the static template table used by both geometry
//!   resolution and volume synthesis.
//! * `geometry` — turns a raw buffer into `(cylinders, heads,
//!   sectors_per_track, bytes_per_sector, media_id)`, repairing or
//!   synthesizing a BPB when needed.
//! * `image` — `DiskImage` itself and its three parser entry points.
//! * `fat` — FAT12/FAT16 cell access, directory entries, the volume
//!   decoder, and the volume builder.
//! * `present` — directory listing, JSON export, and file manifest
//!   presenters.
//! * `runtime` — sector seek/read/write with dynamic reformat support.

pub mod byteview;
pub mod sector;
pub mod bpb;
pub mod mbr;
pub mod geometry;
pub mod image;
pub mod fat;
pub mod present;
pub mod runtime;

use log::{warn,info};

pub type DYNERR = Box<dyn std::error::Error>;
pub type STDRESULT = Result<(),DYNERR>;

/// Which of the three parser entry points produced a `DiskImage`. Kept as
/// a tagged variant (design note: "polymorphic parser entry points should
/// be modeled as a tagged variant of source-kind... not as inheritance")
/// rather than a trait object, since the three parsers share no state
/// beyond their common `DiskImage` output.
pub enum SourceKind<'a> {
    Buffer(&'a [u8]),
    Json(&'a str),
    Psi(&'a [u8])
}

/// Parse an image from any of the three supported sources, then run the
/// shared post-processing step: attempt `build_tables()` so the caller
/// gets a populated file table whenever the image holds a recognizable
/// FAT volume. A decode failure here is only logged; an image with no
/// FAT volume (a blank floppy, a non-FAT disk) is still a valid
/// `DiskImage`.
pub fn open_image(source: SourceKind, opts: &image::ParseOptions) -> Result<image::DiskImage,DYNERR> {
    let mut img = match source {
        SourceKind::Buffer(bytes) => image::from_buffer::build_from_buffer(bytes,opts)?,
        SourceKind::Psi(bytes) => image::psi::build_from_psi(bytes)?,
        SourceKind::Json(text) => image::from_json::build_from_json(text)?
    };
    if let Err(e) = img.build_tables() {
        warn!("file table construction failed: {}",e);
    }
    Ok(img)
}

/// Load an image from a host file, dispatching on extension: `.psi` is
/// read as a PCE Sector Image, `.json` as structured JSON, anything else
/// as a raw sector-stream buffer.
pub fn open_image_from_file(path: &str, opts: &image::ParseOptions) -> Result<image::DiskImage,DYNERR> {
    let bytes = std::fs::read(path)?;
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "psi" => {
            info!("loading {} as a PSI sector image",path);
            open_image(SourceKind::Psi(&bytes),opts)
        }
        "json" => {
            info!("loading {} as a JSON disk image",path);
            let text = String::from_utf8(bytes)?;
            open_image(SourceKind::Json(&text),opts)
        }
        _ => {
            info!("loading {} as a raw sector-stream buffer",path);
            open_image(SourceKind::Buffer(&bytes),opts)
        }
    }
}

/// Serialize `image` back to a raw sector-stream buffer and write it to
/// `path`, making any in-memory changes permanent on the host filesystem.
pub fn save_img(image: &image::DiskImage, path: &str) -> STDRESULT {
    std::fs::write(path,image.get_data())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpb;

    #[test]
    fn test_open_image_buffer_round_trip() {
        let tmpl = &bpb::TEMPLATES[0];
        let len = bpb::template_buffer_len(&tmpl.bpb) as usize;
        let mut buf = vec![0u8;len];
        let bs = bpb::BootSector::from_template(tmpl.bpb,512);
        let sec = bs.to_bytes();
        buf[0..sec.len()].copy_from_slice(&sec);

        let img = open_image(SourceKind::Buffer(&buf),&image::ParseOptions::default()).unwrap();
        assert_eq!(img.get_data(),buf);
    }
}
