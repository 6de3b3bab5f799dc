//! ## Runtime Access
//!
//! Sector seek/read/write against a live `DiskImage`, plus the explicit
//! reformat capability that dynamic geometry expansion is modeled as
//! (design note: "dynamic geometry expansion in `seek` is a compatibility
//! wart; model it as an explicit reformat capability exposed to the drive
//! collaborator rather than as an implicit side effect of seek"). Grounded
//! on the teacher's own seek/modify split across `img::DiskImage` methods,
//! generalized to this engine's single concrete sector grid.

use thiserror::Error;

use crate::image::DiskImage;
use crate::sector::Sector;

#[derive(Error,Debug)]
pub enum Error {
    #[error("no sector ({0},{1},{2}) on this image")]
    NotFound(usize,usize,usize),
    #[error(transparent)]
    Sector(#[from] crate::sector::Error)
}

/// Carries forward the position of the last successful `seek`, so a
/// repeated request for the same `(c,h,id)` resumes from the sector after
/// the one it last returned instead of restarting at the top of the
/// track. This is what lets weak-bit/duplicate-ID sequences on
/// copy-protected media cycle through every physical copy of an id in
/// turn rather than always landing on the first.
#[derive(Clone,Copy,Debug,Default)]
pub struct SeekState {
    last: Option<(usize,usize,usize,usize)>
}

impl SeekState {
    pub fn new() -> Self { Self::default() }
}

/// Find the sector `(c,h,id)` by linear scan of the track, since sectors
/// are not guaranteed to be numerically sorted. When `state` shows the
/// immediately preceding call resolved the same `(c,h,id)`, resume the
/// scan just past that sector's position (wrapping back to the start of
/// the track) so repeated requests for a duplicated id cycle through
/// every physical copy rather than always returning the first.
pub fn seek<'a>(image: &'a DiskImage, state: &mut SeekState, c: usize, h: usize, id: usize) -> Option<&'a Sector> {
    let track = image.track(c,h);
    if track.is_empty() {
        state.last = None;
        return None;
    }
    let start = match state.last {
        Some((pc,ph,pid,pidx)) if (pc,ph,pid) == (c,h,id) => (pidx + 1) % track.len(),
        _ => 0
    };
    for offset in 0..track.len() {
        let idx = (start + offset) % track.len();
        if track[idx].id() == id {
            state.last = Some((c,h,id,idx));
            return Some(&track[idx]);
        }
    }
    state.last = None;
    None
}

/// Read one byte through a seek, for callers that don't need the sector
/// reference itself.
pub fn read_byte(image: &DiskImage, state: &mut SeekState, c: usize, h: usize, id: usize, byte_index: usize) -> Result<u8,Error> {
    let sector = seek(image,state,c,h,id).ok_or(Error::NotFound(c,h,id))?;
    Ok(sector.read(byte_index)?)
}

/// Write one byte through a direct (non-cycling) sector lookup.
pub fn write_byte(image: &mut DiskImage, c: usize, h: usize, id: usize, byte_index: usize, value: u8) -> Result<(),Error> {
    let sector = image.find_sector_mut(c,h,id).ok_or(Error::NotFound(c,h,id))?;
    sector.write(byte_index,value)?;
    Ok(())
}

/// Reformat capability: bring a track up to `target_head` by synthesizing
/// any missing heads with `sectors_per_track` freshly blanked sectors, as
/// a drive formatting the second side of a previously single-sided disk
/// would. Bumps the image's nominal head count if this expands it.
pub fn reformat_expand_head(image: &mut DiskImage, c: usize, target_head: usize, sectors_per_track: usize, bytes_per_sector: usize) {
    while image.head_count(c) <= target_head {
        let h = image.head_count(c);
        for s in 1..=sectors_per_track {
            image.push_sector(c,h,Sector::blank(c,h,s,bytes_per_sector));
        }
    }
    if image.geometry.heads <= target_head {
        image.geometry.heads = target_head + 1;
    }
}

/// Reformat capability: append one freshly blanked sector with logical id
/// `new_id` to an existing track, as a drive formatting a ninth sector
/// onto a previously eight-sector track would. Bumps the image's nominal
/// sector-per-track count if this expands it.
pub fn reformat_expand_sector(image: &mut DiskImage, c: usize, h: usize, new_id: usize, bytes_per_sector: usize) {
    image.push_sector(c,h,Sector::blank(c,h,new_id,bytes_per_sector));
    if image.geometry.sectors_per_track < new_id {
        image.geometry.sectors_per_track = new_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DiskGeometry;

    fn two_id_one_track() -> DiskImage {
        let mut img = DiskImage::new(DiskGeometry { cylinders: 1, heads: 1, sectors_per_track: 0, bytes_per_sector: 512, media_id: 0xf0 });
        img.push_sector(0,0,Sector::blank(0,0,3,512));
        img.push_sector(0,0,Sector::blank(0,0,3,512));
        img.push_sector(0,0,Sector::blank(0,0,5,512));
        img
    }

    #[test]
    fn test_seek_cycles_through_duplicate_ids() {
        let img = two_id_one_track();
        let mut state = SeekState::new();
        let first = seek(&img,&mut state,0,0,3).unwrap();
        assert!(std::ptr::eq(first,&img.track(0,0)[0]));
        let second = seek(&img,&mut state,0,0,3).unwrap();
        assert!(std::ptr::eq(second,&img.track(0,0)[1]));
        let third = seek(&img,&mut state,0,0,3).unwrap();
        assert!(std::ptr::eq(third,&img.track(0,0)[0]));
    }

    #[test]
    fn test_seek_unrelated_id_resets_cycle() {
        let img = two_id_one_track();
        let mut state = SeekState::new();
        seek(&img,&mut state,0,0,3).unwrap();
        let other = seek(&img,&mut state,0,0,5).unwrap();
        assert!(std::ptr::eq(other,&img.track(0,0)[2]));
        let back = seek(&img,&mut state,0,0,3).unwrap();
        assert!(std::ptr::eq(back,&img.track(0,0)[0]));
    }

    #[test]
    fn test_reformat_expand_head_bumps_nominal_geometry() {
        let mut img = DiskImage::new(DiskGeometry { cylinders: 1, heads: 1, sectors_per_track: 8, bytes_per_sector: 512, media_id: 0xfe });
        reformat_expand_head(&mut img,0,1,8,512);
        assert_eq!(img.head_count(0),2);
        assert_eq!(img.geometry.heads,2);
        assert_eq!(img.sector_count(0,1),8);
    }

    #[test]
    fn test_reformat_expand_sector_bumps_nominal_geometry() {
        let mut img = DiskImage::new(DiskGeometry { cylinders: 1, heads: 1, sectors_per_track: 8, bytes_per_sector: 512, media_id: 0xfe });
        for s in 1..=8 {
            img.push_sector(0,0,Sector::blank(0,0,s,512));
        }
        reformat_expand_sector(&mut img,0,0,9,512);
        assert_eq!(img.sector_count(0,0),9);
        assert_eq!(img.geometry.sectors_per_track,9);
    }

    #[test]
    fn test_write_byte_through_runtime() {
        let mut img = DiskImage::new(DiskGeometry { cylinders: 1, heads: 1, sectors_per_track: 1, bytes_per_sector: 512, media_id: 0xfe });
        img.push_sector(0,0,Sector::blank(0,0,1,512));
        write_byte(&mut img,0,0,1,10,0x42).unwrap();
        let mut state = SeekState::new();
        assert_eq!(read_byte(&img,&mut state,0,0,1,10).unwrap(),0x42);
    }
}
