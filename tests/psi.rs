//! PSI container parsing exercised through the public `open_image` entry
//! point, including the compressed-fill sector shape and a deliberately
//! corrupted chunk CRC.

use pcedisk::{open_image,SourceKind};
use pcedisk::image::ParseOptions;

fn crc_of(four_cc: &[u8;4], size_be: &[u8;4], payload: &[u8]) -> u32 {
    const PSI_CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::Algorithm {
        width: 32, poly: 0x1EDC6F41, init: 0xFFFFFFFF,
        refin: true, refout: true, xorout: 0xFFFFFFFF,
        check: 0xE3069283, residue: 0xB798B438
    });
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
fn test_open_image_reads_a_two_sector_track() {
    let mut buf = Vec::new();
    buf.extend(build_chunk(b"PSI ",&[0,0,0,0]));
    buf.extend(build_chunk(b"SECT",&[0,0,1,2,0,0,0]));
    let mut p1 = vec![0u8;512];
    p1[0] = 0x11;
    buf.extend(build_chunk(b"DATA",&p1));
    buf.extend(build_chunk(b"SECT",&[0,0,2,2,0,0,0]));
    let mut p2 = vec![0u8;512];
    p2[0] = 0x22;
    buf.extend(build_chunk(b"DATA",&p2));
    buf.extend(build_chunk(b"END ",&[]));

    let img = open_image(SourceKind::Psi(&buf),&ParseOptions::default()).unwrap();
    assert_eq!(img.sector_count(0,0),2);
    assert_eq!(img.find_sector(0,0,1).unwrap().read(0).unwrap(),0x11);
    assert_eq!(img.find_sector(0,0,2).unwrap().read(0).unwrap(),0x22);
}

#[test]
fn test_open_image_expands_fill_pattern_sector() {
    let mut buf = Vec::new();
    // flags bit0 set: fill pattern, no DATA payload bytes
    buf.extend(build_chunk(b"SECT",&[0,0,1,2,0b0001,0,0x5a]));
    buf.extend(build_chunk(b"DATA",&[]));
    buf.extend(build_chunk(b"END ",&[]));

    let img = open_image(SourceKind::Psi(&buf),&ParseOptions::default()).unwrap();
    let sec = img.find_sector(0,0,1).unwrap();
    assert_eq!(sec.length(),512);
    assert_eq!(sec.read(0).unwrap(),0x5a);
    assert_eq!(sec.read(511).unwrap(),0x5a);
}

#[test]
fn test_open_image_on_truncated_psi_still_yields_a_usable_image() {
    let mut buf = build_chunk(b"SECT",&[0,0,1,2,0,0,0]);
    buf[8] ^= 0xff; // corrupt the CRC of this chunk
    buf.extend(build_chunk(b"END ",&[]));

    let img = open_image(SourceKind::Psi(&buf),&ParseOptions::default()).unwrap();
    assert_eq!(img.cylinder_count(),0);
}
