//! ### FAT directory entries
//!
//! The 32-byte directory entry layout and the date/time/name packing
//! helpers, grounded on the teacher's `fs::fat::directory` and
//! `fs::fat::pack` modules. Two deliberate deviations from the teacher,
//! recorded in `DESIGN.md`: the year clamp follows the spec's
//! `[1980,2099]` range rather than the teacher's `[1980,2107]`, and the
//! short-name character transform follows the spec's explicit allow-list
//! rather than the teacher's block-list.

use chrono::{Datelike,Timelike};
use log::warn;

use a2kit_macro::DiskStruct;
use a2kit_macro_derive::DiskStruct;

pub const DIR_ENTRY_SIZE: usize = 32;
pub const FREE: u8 = 0xe5;
pub const FREE_AND_NO_MORE: u8 = 0x00;

pub const READ_ONLY: u8 = 0x01;
pub const HIDDEN: u8 = 0x02;
pub const SYSTEM: u8 = 0x04;
pub const VOLUME_ID: u8 = 0x08;
pub const SUBDIR: u8 = 0x10;
pub const ARCHIVE: u8 = 0x20;

/// Characters allowed in an 8.3 short name; anything else is replaced with `_`.
const SHORT_NAME_ALLOWED_EXTRA: &str = "!#$%&'()-@^_`{}~";

#[derive(DiskStruct,Clone)]
pub struct DirEntry {
    pub name: [u8;8],
    pub ext: [u8;3],
    pub attr: u8,
    pub reserved: [u8;10],
    pub mod_time: [u8;2],
    pub mod_date: [u8;2],
    pub cluster1: [u8;2],
    pub file_size: [u8;4]
}

impl DirEntry {
    pub fn is_free(&self) -> bool { self.name[0] == FREE }
    pub fn is_end(&self) -> bool { self.name[0] == FREE_AND_NO_MORE }
    pub fn attr(&self, mask: u8) -> bool { self.attr & mask != 0 }
    pub fn cluster1(&self) -> usize { u16::from_le_bytes(self.cluster1) as usize }
    pub fn size(&self) -> usize { u32::from_le_bytes(self.file_size) as usize }
    pub fn erase(&mut self, no_more: bool) {
        self.name[0] = if no_more { FREE_AND_NO_MORE } else { FREE };
    }
    pub fn set_cluster(&mut self, cluster: usize) {
        self.cluster1 = (cluster as u16).to_le_bytes();
    }
    pub fn name_string(&self) -> (String,String) {
        file_name_to_split_string(self.name, self.ext)
    }
}

/// Pack a date in the FAT `yyyyyyym mmmddddd` layout (year base 1980),
/// clamping years outside `[1980,2099]` to the nearest boundary.
pub fn pack_date(time: chrono::NaiveDateTime) -> [u8;2] {
    let year = match time.year() {
        y if y < 1980 => { warn!("date before 1980, clamped"); 1980 }
        y if y > 2099 => { warn!("date after 2099, clamped"); 2099 }
        y => y
    };
    let packed = time.day() as u16 + ((time.month() as u16) << 5) + (((year - 1980) as u16) << 9);
    packed.to_le_bytes()
}

pub fn pack_time(time: chrono::NaiveDateTime) -> [u8;2] {
    let packed = (time.second() as u16)/2 + ((time.minute() as u16) << 5) + ((time.hour() as u16) << 11);
    packed.to_le_bytes()
}

pub fn unpack_date(bytes: [u8;2]) -> Option<chrono::NaiveDate> {
    if bytes == [0,0] {
        return None;
    }
    let packed = u16::from_le_bytes(bytes);
    let year = 1980 + (packed >> 9) as i32;
    let month = ((packed >> 5) & 0b1111) as u32;
    let day = (packed & 0b1_1111) as u32;
    chrono::NaiveDate::from_ymd_opt(year,month,day)
}

pub fn unpack_time(bytes: [u8;2]) -> Option<chrono::NaiveTime> {
    let packed = u16::from_le_bytes(bytes);
    let hour = (packed >> 11) as u32;
    let minute = ((packed >> 5) & 0b11_1111) as u32;
    let second = ((packed & 0b1_1111) * 2) as u32;
    chrono::NaiveTime::from_hms_opt(hour,minute,second)
}

/// Split an `NNNNNNNN.EEE` style name into the padded 8-byte/3-byte directory fields.
pub fn string_to_file_name(s: &str) -> ([u8;8],[u8;3]) {
    if s == "." {
        return ([b'.',32,32,32,32,32,32,32],[32,32,32]);
    }
    if s == ".." {
        return ([b'.',b'.',32,32,32,32,32,32],[32,32,32]);
    }
    let mut it = s.splitn(2,'.');
    let base = it.next().unwrap_or("");
    let ext = it.next().unwrap_or("");
    let mut name = [0x20u8;8];
    let mut typ = [0x20u8;3];
    for (i,b) in base.as_bytes().iter().take(8).enumerate() { name[i] = *b; }
    for (i,b) in ext.as_bytes().iter().take(3).enumerate() { typ[i] = *b; }
    (name,typ)
}

pub fn file_name_to_split_string(name: [u8;8], ext: [u8;3]) -> (String,String) {
    match (name,ext) {
        ([b'.',32,32,32,32,32,32,32],[32,32,32]) => (".".to_string(),"".to_string()),
        ([b'.',b'.',32,32,32,32,32,32],[32,32,32]) => ("..".to_string(),"".to_string()),
        _ => (
            String::from_utf8_lossy(&name).trim_end().to_string(),
            String::from_utf8_lossy(&ext).trim_end().to_string()
        )
    }
}

pub fn file_name_to_string(name: [u8;8], ext: [u8;3]) -> String {
    let (base,typ) = file_name_to_split_string(name,ext);
    if typ.is_empty() { base } else { format!("{}.{}",base,typ) }
}

/// Short-name transform (spec §4.5 step 9): uppercase, replace any
/// character outside `[A-Z0-9!#$%&'()-@^_\`{}~]` with `_`, truncate base
/// to 8 chars and extension to 3.
pub fn to_short_name(host_name: &str) -> String {
    let upper = host_name.to_uppercase();
    let mut it = upper.rsplitn(2,'.');
    let (base,ext) = match (it.next(),it.next()) {
        (Some(e),Some(b)) if !b.is_empty() => (b.to_string(),e.to_string()),
        _ => (upper.clone(),String::new())
    };
    let filt = |s: &str,max: usize| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || SHORT_NAME_ALLOWED_EXTRA.contains(c) { c } else { '_' })
            .take(max)
            .collect()
    };
    let base = filt(&base,8);
    if ext.is_empty() {
        base
    } else {
        format!("{}.{}",base,filt(&ext,3))
    }
}

/// Volume labels take the first 11 chars with no period, same allow-list.
pub fn to_label_name(host_name: &str) -> [u8;11] {
    let upper = host_name.to_uppercase();
    let mut ans = [0x20u8;11];
    let mut i = 0;
    for c in upper.chars() {
        if i >= 11 { break; }
        let b = if c.is_ascii_alphanumeric() || SHORT_NAME_ALLOWED_EXTRA.contains(c) { c as u8 } else { b'_' };
        ans[i] = b;
        i += 1;
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_date_clamp_below_1980() {
        let dt = NaiveDate::from_ymd_opt(1975,6,1).unwrap().and_hms_opt(0,0,0).unwrap();
        let packed = pack_date(dt);
        assert_eq!(unpack_date(packed).unwrap().year(),1980);
    }

    #[test]
    fn test_date_clamp_above_2099() {
        let dt = NaiveDate::from_ymd_opt(2150,1,1).unwrap().and_hms_opt(0,0,0).unwrap();
        let packed = pack_date(dt);
        assert_eq!(unpack_date(packed).unwrap().year(),2099);
    }

    #[test]
    fn test_date_roundtrip() {
        let dt = NaiveDate::from_ymd_opt(2024,3,17).unwrap().and_hms_opt(13,45,30).unwrap();
        let date = unpack_date(pack_date(dt)).unwrap();
        assert_eq!((date.year(),date.month(),date.day()),(2024,3,17));
        let time = unpack_time(pack_time(dt)).unwrap();
        assert_eq!((time.hour(),time.minute()),(13,45));
    }

    #[test]
    fn test_short_name_transform() {
        assert_eq!(to_short_name("hello world.txt"),"HELLO_WO.TXT");
        assert_eq!(to_short_name("readme"),"README");
        assert_eq!(to_short_name("a+b.c"),"A_B.C");
    }

    #[test]
    fn test_dot_dotdot() {
        assert_eq!(string_to_file_name("."),([b'.',32,32,32,32,32,32,32],[32,32,32]));
        let (n,e) = string_to_file_name("..");
        assert_eq!(file_name_to_split_string(n,e),("..".to_string(),"".to_string()));
    }
}
