//! Whole-crate round-trip coverage: synthesize a volume, decode it back,
//! and carry it through the buffer/JSON serialization paths.

use pcedisk::{open_image,SourceKind};
use pcedisk::image::ParseOptions;
use pcedisk::image::from_buffer::build_from_buffer;
use pcedisk::fat::build::{build_from_files,HostEntry};
use pcedisk::present::json::{to_json_legacy,to_json_extended};
use pcedisk::present::{listing,manifest};
use pcedisk::bpb;

fn sample_tree() -> Vec<HostEntry> {
    vec![
        HostEntry::file("README.TXT",None,b"hello from the manifest".to_vec()),
        HostEntry::dir("DOCS",None,vec![
            HostEntry::file("NOTES.TXT",None,b"nested file contents".to_vec())
        ])
    ]
}

#[test]
fn test_synthesized_volume_decodes_back_to_the_same_file_set() {
    let mut img = build_from_files(&sample_tree(),Some(360)).unwrap();
    img.build_tables().unwrap();

    assert_eq!(img.vol_info.len(),1);
    let names: Vec<&str> = img.file_info.iter().map(|f| f.name.as_str()).collect();
    assert!(names.contains(&"README.TXT"));
    assert!(names.contains(&"DOCS"));

    let nested = img.file_info.iter().find(|f| f.name == "NOTES.TXT").unwrap();
    assert_eq!(nested.path,"\\DOCS\\");
    assert_eq!(nested.size,"nested file contents".len());
}

#[test]
fn test_buffer_round_trip_preserves_bytes() {
    let img = build_from_files(&sample_tree(),Some(360)).unwrap();
    let buf = img.get_data();

    let reopened = open_image(SourceKind::Buffer(&buf),&ParseOptions::default()).unwrap();
    assert_eq!(reopened.get_data(),buf);
    assert_eq!(reopened.file_info.len(),img.file_info.len());
}

#[test]
fn test_legacy_json_round_trip_preserves_bytes() {
    let mut img = build_from_files(&sample_tree(),Some(360)).unwrap();
    img.build_tables().unwrap();
    let buf = img.get_data();

    let text = to_json_legacy(&img);
    let reopened = open_image(SourceKind::Json(&text),&ParseOptions::default()).unwrap();
    assert_eq!(reopened.get_data(),buf);
}

#[test]
fn test_extended_json_carries_file_table_and_checksum() {
    let mut img = build_from_files(&sample_tree(),Some(360)).unwrap();
    img.build_tables().unwrap();
    let text = to_json_extended(&img);
    assert!(text.contains("README.TXT"));
    assert!(text.contains("\"volTable\""));
    assert!(text.contains(&format!("{:08x}",img.checksum())));
}

#[test]
fn test_repaired_bpb_survives_extended_json_round_trip() {
    // a zeroed-BPB 360K image, same shape as the S2 geometry scenario:
    // resolution repairs the BPB in place and captures the original bytes
    // at a nonzero offset, which the extended JSON round trip must preserve.
    let tmpl = &bpb::TEMPLATES[3];
    let len = bpb::template_buffer_len(&tmpl.bpb) as usize;
    let mut buf = vec![0u8;len];
    buf[510] = 0x55;
    buf[511] = 0xaa;

    let img = build_from_buffer(&buf,&ParseOptions::default()).unwrap();
    assert!(img.bpb_modified);
    let original = img.get_data();

    let text = to_json_extended(&img);
    assert!(text.contains("bootSectorOffset"));
    let reopened = open_image(SourceKind::Json(&text),&ParseOptions::default()).unwrap();
    assert_eq!(reopened.get_data(),original);
}

#[test]
fn test_directory_listing_and_manifest_agree_on_file_count() {
    let mut img = build_from_files(&sample_tree(),Some(360)).unwrap();
    img.build_tables().unwrap();

    let text = listing::directory_listing(&img,0).unwrap();
    assert!(text.contains("README"));
    assert!(text.contains("DOCS"));

    let entries = manifest::build_manifest(&img);
    // DOCS is a directory and is excluded; README.TXT and NOTES.TXT remain.
    assert_eq!(entries.len(),2);
}
