//! ### PSI (PCE Sector Image) parser
//!
//! PSI is a chunked container: each chunk is a 12-byte header
//! `(fourCC: [u8;4], size: u32 big-endian, crc32: u32 big-endian)`
//! followed by `size` bytes of payload, the CRC covering the fourCC, the
//! size field, and the payload. No teacher module reads a chunked
//! sector-image container like this one; grounded instead on the generic
//! chunked-format CRC style used across `other_examples/`'s PNG/RIFF-style
//! readers, adapted to PSI's specific chunk set and its reflected
//! CRC-32 polynomial via the `crc` crate already in the dependency tree
//! for other checksum work.

use log::warn;

use crate::sector::Sector;
use crate::geometry::DiskGeometry;
use super::{DiskImage,Error};

const HEADER_LEN: usize = 12;

/// SECT flag bits this reader recognizes: bit0 fill pattern, bit2 data
/// error. Any other bit set is returned so the caller can warn.
fn unrecognized_sect_flags(flags: u8) -> Option<u8> {
    let extra = flags & !0b0101;
    if extra != 0 { Some(extra) } else { None }
}

/// PSI's CRC-32 variant: reflected input/output, polynomial `0x1EDC6F41`
/// (CRC-32C family), init `0xFFFFFFFF`, final xor `0xFFFFFFFF`.
const PSI_CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::Algorithm {
    width: 32,
    poly: 0x1EDC6F41,
    init: 0xFFFFFFFF,
    refin: true,
    refout: true,
    xorout: 0xFFFFFFFF,
    check: 0xE3069283,
    residue: 0xB798B438
});

struct Chunk<'a> {
    four_cc: [u8;4],
    payload: &'a [u8],
    crc_ok: bool
}

fn read_chunk<'a>(buf: &'a [u8], offset: usize) -> Option<Chunk<'a>> {
    if offset + HEADER_LEN > buf.len() {
        return None;
    }
    let four_cc: [u8;4] = buf[offset..offset+4].try_into().ok()?;
    let size = u32::from_be_bytes(buf[offset+4..offset+8].try_into().ok()?) as usize;
    let stored_crc = u32::from_be_bytes(buf[offset+8..offset+12].try_into().ok()?);
    let payload_start = offset + HEADER_LEN;
    if payload_start + size > buf.len() {
        return None;
    }
    let payload = &buf[payload_start..payload_start+size];
    let mut digest = PSI_CRC.digest();
    digest.update(&four_cc);
    digest.update(&buf[offset+4..offset+8]);
    digest.update(payload);
    let computed = digest.finalize();
    Some(Chunk { four_cc, payload, crc_ok: computed == stored_crc })
}

/// Parse a PSI byte stream into a `DiskImage`, growing the cylinder/head
/// grid lazily as `SECT` chunks name new tracks. A PSI CRC mismatch ends
/// the stream early (a warning, not a hard error) rather than failing the
/// whole parse, matching the "warning: recoverable, engine proceeds" rule.
pub fn build_from_psi(buffer: &[u8]) -> Result<DiskImage,Error> {
    let mut image = DiskImage::new(DiskGeometry {
        cylinders: 0, heads: 0, sectors_per_track: 0, bytes_per_sector: 512, media_id: 0
    });

    let mut offset = 0usize;
    let mut pending: Option<(usize,usize,usize,usize,u8,u8)> = None; // c,h,id,size,flags,fill_pattern

    loop {
        let chunk = match read_chunk(buffer, offset) {
            Some(c) => c,
            None => break
        };
        if !chunk.crc_ok {
            warn!("PSI CRC mismatch at offset {:#x}, treating as end of stream",offset);
            break;
        }
        offset += HEADER_LEN + chunk.payload.len();
        // chunks are padded to even length per the PCE container convention
        if chunk.payload.len() % 2 == 1 {
            offset += 1;
        }

        match &chunk.four_cc {
            b"PSI " => {
                // file format word, sector format word: acknowledged only
            }
            b"SECT" => {
                if pending.is_some() {
                    warn!("SECT chunk with no following DATA, previous sector dropped");
                }
                if chunk.payload.len() < 7 {
                    return Err(Error::MalformedPsi("SECT chunk too short".to_string()));
                }
                let c = chunk.payload[0] as usize;
                let h = chunk.payload[1] as usize;
                let id = chunk.payload[2] as usize;
                let size_code = chunk.payload[3];
                let size = 128usize << size_code.min(7);
                let flags = chunk.payload[4];
                let fill_pattern = chunk.payload[6];
                if let Some(extra) = unrecognized_sect_flags(flags) {
                    warn!("SECT flags carry unrecognized bits {:#04x}",extra);
                }
                pending = Some((c,h,id,size,flags,fill_pattern));
            }
            b"DATA" => {
                let (c,h,id,size,flags,fill_pattern) = match pending.take() {
                    Some(p) => p,
                    None => {
                        return Err(Error::MalformedPsi("DATA chunk with no preceding SECT".to_string()));
                    }
                };
                let is_fill = flags & 0b0001 != 0;
                let is_error = flags & 0b0100 != 0;
                if is_fill && !chunk.payload.is_empty() {
                    warn!("SECT fill flag set but DATA payload is non-empty; DATA wins");
                }
                let mut words;
                if is_fill || chunk.payload.is_empty() {
                    let word = u32::from_le_bytes([fill_pattern,fill_pattern,fill_pattern,fill_pattern]);
                    words = vec![word];
                } else {
                    let nwords = (chunk.payload.len()+3)/4;
                    words = Vec::with_capacity(nwords);
                    for i in 0..nwords {
                        let start = i*4;
                        let mut w = [0u8;4];
                        let avail = (chunk.payload.len()-start).min(4);
                        w[..avail].copy_from_slice(&chunk.payload[start..start+avail]);
                        words.push(u32::from_le_bytes(w));
                    }
                }
                if words.is_empty() {
                    words.push(0);
                }
                let mut sector = Sector::from_words(c,h,id,size,words);
                if is_error {
                    sector.set_data_error(Some(-1));
                }
                image.push_sector(c,h,sector);
            }
            b"IBMM" | b"OFFS" | b"TEXT" => {
                // acknowledged, ignored
            }
            b"END " => {
                break;
            }
            other => {
                warn!("unrecognized PSI chunk type {:?}",String::from_utf8_lossy(other));
            }
        }
    }

    image.geometry.cylinders = image.cylinder_count();
    image.geometry.heads = (0..image.cylinder_count()).map(|c| image.head_count(c)).max().unwrap_or(0);
    image.geometry.sectors_per_track = (0..image.cylinder_count())
        .flat_map(|c| (0..image.head_count(c)).map(move |h| (c,h)))
        .map(|(c,h)| image.sector_count(c,h))
        .max()
        .unwrap_or(0);

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crc_of(four_cc: &[u8;4], size_be: &[u8;4], payload: &[u8]) -> u32 {
        let mut digest = PSI_CRC.digest();
        digest.update(four_cc);
        digest.update(size_be);
        digest.update(payload);
        digest.finalize()
    }

    fn build_chunk(four_cc: &[u8;4], payload: &[u8]) -> Vec<u8> {
        let size_be = (payload.len() as u32).to_be_bytes();
        let crc = crc_of(four_cc,&size_be,payload);
        let mut ans = Vec::new();
        ans.extend_from_slice(four_cc);
        ans.extend_from_slice(&size_be);
        ans.extend_from_slice(&crc.to_be_bytes());
        ans.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            ans.push(0);
        }
        ans
    }

    #[test]
    fn test_sect_data_end_roundtrip() {
        let mut buf = Vec::new();
        buf.extend(build_chunk(b"PSI ",&[0,0,0,0]));
        buf.extend(build_chunk(b"SECT",&[0,0,1,2,0,0,0])); // size_code=2 -> 512 bytes
        let mut payload = vec![0u8;512];
        payload[0] = 0x41;
        buf.extend(build_chunk(b"DATA",&payload));
        buf.extend(build_chunk(b"END ",&[]));

        let img = build_from_psi(&buf).unwrap();
        assert_eq!(img.cylinder_count(),1);
        let sec = img.find_sector(0,0,1).unwrap();
        assert_eq!(sec.read(0).unwrap(),0x41);
        assert_eq!(sec.length(),512);
    }

    #[test]
    fn test_sect_flag_bit2_sets_data_error() {
        let mut buf = Vec::new();
        buf.extend(build_chunk(b"SECT",&[0,0,1,2,0b0100,0,0]));
        buf.extend(build_chunk(b"DATA",&vec![0u8;512]));
        buf.extend(build_chunk(b"END ",&[]));
        let img = build_from_psi(&buf).unwrap();
        let sec = img.find_sector(0,0,1).unwrap();
        assert!(sec.read(0).is_err());
    }

    #[test]
    fn test_unrecognized_sect_flags_detects_bits_outside_fill_and_error() {
        assert_eq!(unrecognized_sect_flags(0b0000),None);
        assert_eq!(unrecognized_sect_flags(0b0001),None); // fill only
        assert_eq!(unrecognized_sect_flags(0b0100),None); // data error only
        assert_eq!(unrecognized_sect_flags(0b0101),None); // both recognized bits
        assert_eq!(unrecognized_sect_flags(0b0010),Some(0b0010)); // bit1, previously the only bit checked
        assert_eq!(unrecognized_sect_flags(0b1000),Some(0b1000)); // bit3, previously missed entirely
    }

    #[test]
    fn test_corrupt_crc_ends_stream_early() {
        let mut buf = build_chunk(b"SECT",&[0,0,1,2,0,0,0]);
        // corrupt the stored CRC of this chunk
        let crc_off = 8;
        buf[crc_off] ^= 0xff;
        buf.extend(build_chunk(b"END ",&[]));
        let img = build_from_psi(&buf).unwrap();
        assert_eq!(img.cylinder_count(),0);
    }
}
