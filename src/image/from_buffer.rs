//! ### Raw-buffer image parser
//!
//! Resolves geometry, then walks cylinders → heads → sectors slicing the
//! byte range for each sector out of the original buffer via the sector
//! codec. XDF images get the variable-size-sector-per-track layout
//! instead of the nominal uniform grid.

use log::warn;

use crate::geometry::{self,ResolveOptions};
use crate::sector::Sector;
use super::{DiskImage,Error,ParseOptions};

/// Parse a raw sector-stream buffer (IMG/IMA) into a `DiskImage`.
pub fn build_from_buffer(buffer: &[u8], opts: &ParseOptions) -> Result<DiskImage,Error> {
    let mut owned = buffer.to_vec();
    let resolved = geometry::resolve(&mut owned, &opts.resolve);
    if resolved.geometry.heads == 0 || resolved.geometry.sectors_per_track == 0 {
        return Err(Error::UnresolvableGeometry);
    }
    for w in &resolved.warnings {
        warn!("{}",w);
    }

    let mut image = DiskImage::new(resolved.geometry);
    image.xdf = resolved.xdf;
    image.bpb_modified = resolved.bpb_modified;
    if resolved.bpb_modified {
        // covers both fields a resolve() pass can rewrite: the 8-byte OEM
        // string at +3 (OEM-string overwrite) and the 25-byte BPBFoundation
        // at +11 (default-BPB repair).
        let off = resolved.boot_sector_offset + 3;
        let len = 8 + 25;
        if off+len <= buffer.len() {
            image.original_bpb = Some((off, buffer[off..off+len].to_vec()));
        }
    }

    if resolved.xdf {
        build_xdf_grid(&owned, &mut image)?;
    } else {
        build_uniform_grid(&owned, &mut image)?;
    }

    apply_overrides(&mut image, opts);
    Ok(image)
}

fn build_uniform_grid(buffer: &[u8], image: &mut DiskImage) -> Result<(),Error> {
    let geom = image.geometry;
    let sec_len = geom.bytes_per_sector;
    let mut offset = 0usize;
    for c in 0..geom.cylinders {
        for h in 0..geom.heads {
            for s in 0..geom.sectors_per_track {
                let id = s + 1;
                if offset + sec_len > buffer.len() {
                    warn!("buffer ran out while building sector ({},{},{})",c,h,id);
                    return Ok(());
                }
                let sector = Sector::from_buffer(c,h,id,sec_len,buffer,offset)
                    .map_err(|_| Error::UnresolvableGeometry)?;
                image.push_sector(c,h,sector);
                offset += sec_len;
            }
        }
    }
    Ok(())
}

fn build_xdf_grid(buffer: &[u8], image: &mut DiskImage) -> Result<(),Error> {
    use crate::geometry::{XDF_CYL0_SECTORS,XDF_SECTOR_IDS,XDF_HEAD0_SIZES,XDF_HEAD1_SIZES};
    let geom = image.geometry;
    let mut offset = 0usize;
    // cylinder 0: 19 sectors/track of 512 bytes, both heads
    for h in 0..geom.heads.max(1) {
        for s in 0..XDF_CYL0_SECTORS {
            let id = s + 1;
            if offset + 512 > buffer.len() {
                return Ok(());
            }
            let sector = Sector::from_buffer(0,h,id,512,buffer,offset)
                .map_err(|_| Error::UnresolvableGeometry)?;
            image.push_sector(0,h,sector);
            offset += 512;
        }
    }
    // remaining cylinders: 4 variable-size sectors per head
    for c in 1..geom.cylinders.max(1) {
        for h in 0..geom.heads.max(1) {
            let sizes = if h == 0 { XDF_HEAD0_SIZES } else { XDF_HEAD1_SIZES };
            for i in 0..4 {
                let id = XDF_SECTOR_IDS[i];
                let len = sizes[i];
                if offset + len > buffer.len() {
                    return Ok(());
                }
                let sector = Sector::from_buffer(c,h,id,len,buffer,offset)
                    .map_err(|_| Error::UnresolvableGeometry)?;
                image.push_sector(c,h,sector);
                offset += len;
            }
        }
    }
    Ok(())
}

fn apply_overrides(image: &mut DiskImage, opts: &ParseOptions) {
    for (c,h,idx,new_id) in opts.sector_id_overrides.iter() {
        if let Some(sec) = image.track_mut(*c,*h).get_mut(*idx) {
            sec.set_id(*new_id);
        } else {
            warn!("sector-id override ({},{},{}) targets a sector that does not exist",c,h,idx);
        }
    }
    for (c,h,idx,err) in opts.sector_error_overrides.iter() {
        if let Some(sec) = image.track_mut(*c,*h).get_mut(*idx) {
            sec.set_data_error(Some(*err));
        } else {
            warn!("sector-error override ({},{},{}) targets a sector that does not exist",c,h,idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpb;

    #[test]
    fn test_build_from_160k_buffer() {
        let tmpl = &bpb::TEMPLATES[0];
        let len = bpb::template_buffer_len(&tmpl.bpb) as usize;
        let mut buf = vec![0u8;len];
        let bs = crate::bpb::BootSector::from_template(tmpl.bpb,512);
        let sec = bs.to_bytes();
        buf[0..sec.len()].copy_from_slice(&sec);
        let img = build_from_buffer(&buf,&ParseOptions::default()).unwrap();
        assert_eq!(img.cylinder_count(),40);
        assert_eq!(img.head_count(0),1);
        assert_eq!(img.sector_count(0,0),8);
        assert_eq!(img.get_data().len(),len);
    }
}
