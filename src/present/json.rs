//! ### JSON export presenter
//!
//! Mirrors `image::from_json`'s two shapes back out: `to_json_legacy`
//! emits the bare `diskData` array, `to_json_extended` wraps it with
//! `imageInfo`/`volTable`/`fileTable`. Built with the `json` crate's
//! `object!`/`array!` macros, matching the teacher's own `FileImage::to_json`
//! and `img::meta` JSON-construction style rather than a `serde` derive.

use json::{object,JsonValue};

use crate::image::DiskImage;
use crate::fat::{VolInfo,FileInfo};

fn sector_to_json(sec: &crate::sector::Sector) -> JsonValue {
    let mut data = JsonValue::new_array();
    for w in sec.words() {
        let _ = data.push(*w);
    }
    let mut ans = object! {
        c: sec.c(),
        h: sec.h(),
        id: sec.id(),
        length: sec.length(),
        data: data
    };
    if let Some(crc) = sec.data_crc() { ans["dataCRC"] = crc.into(); }
    if let Some(err) = sec.data_error() { ans["dataError"] = err.into(); }
    if let Some(mark) = sec.data_mark() { ans["dataMark"] = mark.into(); }
    if let Some(crc) = sec.head_crc() { ans["headCRC"] = crc.into(); }
    if let Some(err) = sec.head_error() { ans["headError"] = err.into(); }
    ans
}

fn disk_data_json(image: &DiskImage) -> JsonValue {
    let mut cylinders = JsonValue::new_array();
    for c in 0..image.cylinder_count() {
        let mut heads = JsonValue::new_array();
        for h in 0..image.head_count(c) {
            let mut sectors = JsonValue::new_array();
            for sec in image.track(c,h) {
                let _ = sectors.push(sector_to_json(sec));
            }
            let _ = heads.push(sectors);
        }
        let _ = cylinders.push(heads);
    }
    cylinders
}

/// Legacy shape: the bare `diskData` nested array, no metadata.
pub fn to_json_legacy(image: &DiskImage) -> String {
    json::stringify(disk_data_json(image))
}

fn vol_info_json(vol: &VolInfo) -> JsonValue {
    object! {
        iVolume: vol.i_volume,
        iPartition: vol.i_partition,
        idMedia: vol.id_media,
        lbaStart: vol.lba_start,
        lbaTotal: vol.lba_total,
        nFatBits: vol.n_fat_bits,
        vbaFat: vol.vba_fat,
        vbaRoot: vol.vba_root,
        vbaData: vol.vba_data,
        nEntries: vol.n_entries,
        clusSecs: vol.clus_secs,
        clusMax: vol.clus_max,
        clusBad: vol.clus_bad,
        clusFree: vol.clus_free,
        clusTotal: vol.clus_total,
        cbSector: vol.cb_sector
    }
}

/// File-table entries omit `name` when `path` already ends with it (never
/// true in practice since `path` is the parent directory, kept here to
/// match the rule as stated), and omit `size`/`vol` when zero. `.`/`..`
/// entries never reach the file table to begin with.
fn file_info_json(f: &FileInfo) -> JsonValue {
    let mut ans = JsonValue::new_object();
    if !f.path.ends_with(&f.name) {
        ans["name"] = f.name.clone().into();
    }
    ans["path"] = f.path.clone().into();
    ans["attr"] = f.attr.into();
    if f.i_volume != 0 {
        ans["vol"] = f.i_volume.into();
    }
    if f.size != 0 {
        ans["size"] = f.size.into();
    }
    ans["startCluster"] = f.start_cluster.into();
    if let Some(d) = f.date {
        ans["date"] = d.format("%Y-%m-%dT%H:%M:%S").to_string().into();
    }
    ans
}

/// Extended shape: `imageInfo`, `volTable`, `fileTable`, `diskData`.
pub fn to_json_extended(image: &DiskImage) -> String {
    let mut image_info = object! {
        "type": "CHS",
        name: image.name.clone().unwrap_or_default(),
        checksum: image.checksum(),
        cylinders: image.cylinder_count(),
        heads: (0..image.cylinder_count()).map(|c| image.head_count(c)).max().unwrap_or(0),
        trackDefault: image.geometry.sectors_per_track,
        sectorDefault: image.geometry.bytes_per_sector,
        diskSize: image.get_data().len(),
        version: env!("CARGO_PKG_VERSION"),
        repository: env!("CARGO_PKG_REPOSITORY"),
        command: "pcedisk"
    };
    image_info["hash"] = format!("{:08x}",image.checksum()).into();
    if image.bpb_modified {
        if let Some((offset,bytes)) = &image.original_bpb {
            image_info["bootSector"] = hex::encode_upper(bytes).into();
            image_info["bootSectorOffset"] = (*offset).into();
        }
    }

    let mut vol_table = JsonValue::new_array();
    for v in &image.vol_info {
        let _ = vol_table.push(vol_info_json(v));
    }
    let mut file_table = JsonValue::new_array();
    for f in &image.file_info {
        if f.is_volume_label() { continue; }
        let _ = file_table.push(file_info_json(f));
    }

    let ans = object! {
        imageInfo: image_info,
        volTable: vol_table,
        fileTable: file_table,
        diskData: disk_data_json(image)
    };
    json::stringify(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DiskGeometry;
    use crate::sector::Sector;

    #[test]
    fn test_legacy_roundtrips_through_from_json() {
        let mut img = DiskImage::new(DiskGeometry { cylinders: 1, heads: 1, sectors_per_track: 1, bytes_per_sector: 512, media_id: 0xf0 });
        img.push_sector(0,0,Sector::blank(0,0,1,512));
        let text = to_json_legacy(&img);
        let reparsed = crate::image::from_json::build_from_json(&text).unwrap();
        assert_eq!(reparsed.get_data(),img.get_data());
    }

    #[test]
    fn test_extended_carries_image_info() {
        let img = DiskImage::new(DiskGeometry { cylinders: 1, heads: 1, sectors_per_track: 1, bytes_per_sector: 512, media_id: 0xf0 });
        let text = to_json_extended(&img);
        assert!(text.contains("\"imageInfo\""));
        assert!(text.contains("\"diskData\""));
    }
}
