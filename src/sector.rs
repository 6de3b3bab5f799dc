//! ## Sector Codec Module
//!
//! Encodes and decodes a single sector as a run-length-compressible array
//! of 32-bit little-endian words, in the style of `bios::fat`'s cell
//! accessors: small, `#[derive(thiserror::Error)]`-backed, and logged
//! through `log` rather than panicking on recoverable conditions.

use thiserror::Error;
use log::{warn,trace};

#[derive(Error,Debug)]
pub enum Error {
    #[error("byte index out of range for sector")]
    OutOfRange,
    #[error("sector is not writable")]
    NotWritable,
    #[error("buffer too short to build sector")]
    ShortBuffer
}

/// A single sector: CHS address, logical sector id, nominal byte length,
/// and the (possibly compressed) word data.
#[derive(Clone,Debug)]
pub struct Sector {
    c: usize,
    h: usize,
    id: usize,
    length: usize,
    data: Vec<u32>,
    writable: bool,
    data_crc: Option<u32>,
    /// negative means the sector returns an error on read
    data_error: Option<i32>,
    data_mark: Option<u8>,
    head_crc: Option<u32>,
    head_error: Option<i32>,
    /// first modified word index, if any write has occurred
    i_modify: Option<usize>,
    /// count of modified words
    c_modify: usize,
    /// index into the file table, once `build_tables` has run
    file_info: Option<usize>,
    /// byte offset of this sector within its file
    file_offset: Option<usize>
}

impl Sector {
    /// Build a sector by reading `length` bytes from `buffer` starting at
    /// `offset`, truncating the trailing run of a repeated word so that
    /// `data` is the shortest prefix that decompresses back to `length`
    /// bytes when the last stored word is replicated.
    pub fn from_buffer(c: usize, h: usize, id: usize, length: usize, buffer: &[u8], offset: usize) -> Result<Self,Error> {
        if offset + length > buffer.len() {
            return Err(Error::ShortBuffer);
        }
        let nwords = length / 4;
        let mut words = Vec::with_capacity(nwords);
        for i in 0..nwords {
            let o = offset + i*4;
            words.push(u32::from_le_bytes(buffer[o..o+4].try_into().expect("unreachable")));
        }
        let trimmed = Self::compress(words);
        Ok(Self {
            c, h, id, length,
            data: trimmed,
            writable: true,
            data_crc: None,
            data_error: None,
            data_mark: None,
            head_crc: None,
            head_error: None,
            i_modify: None,
            c_modify: 0,
            file_info: None,
            file_offset: None
        })
    }
    /// Build a sector directly from an already-decoded (and possibly
    /// already-compressed) word array, as produced by JSON or PSI parsing.
    /// The trailing-run compression invariant is (re-)enforced here so a
    /// caller cannot hand in an uncompressed array and silently break it.
    pub fn from_words(c: usize, h: usize, id: usize, length: usize, words: Vec<u32>) -> Self {
        Self {
            c, h, id, length,
            data: Self::compress(words),
            writable: true,
            data_crc: None,
            data_error: None,
            data_mark: None,
            head_crc: None,
            head_error: None,
            i_modify: None,
            c_modify: 0,
            file_info: None,
            file_offset: None
        }
    }

    /// Build a blank (all-zero) sector of the given CHS/id/length, used by
    /// dynamic reformat (`runtime::seek`) and by the FAT builder.
    pub fn blank(c: usize, h: usize, id: usize, length: usize) -> Self {
        Self {
            c, h, id, length,
            data: vec![0],
            writable: true,
            data_crc: None,
            data_error: None,
            data_mark: None,
            head_crc: None,
            head_error: None,
            i_modify: None,
            c_modify: 0,
            file_info: None,
            file_offset: None
        }
    }
    /// Truncate the trailing run of a repeated word, keeping at least one word.
    fn compress(mut words: Vec<u32>) -> Vec<u32> {
        if words.is_empty() {
            return vec![0];
        }
        let last = *words.last().expect("unreachable");
        while words.len() > 1 && words[words.len()-2] == last {
            words.pop();
        }
        words
    }
    pub fn c(&self) -> usize { self.c }
    pub fn h(&self) -> usize { self.h }
    pub fn id(&self) -> usize { self.id }
    pub fn length(&self) -> usize { self.length }
    pub fn set_id(&mut self, id: usize) { self.id = id; }
    pub fn writable(&self) -> bool { self.writable }
    pub fn set_writable(&mut self, w: bool) { self.writable = w; }
    pub fn data_error(&self) -> Option<i32> { self.data_error }
    pub fn set_data_error(&mut self, e: Option<i32>) { self.data_error = e; }
    pub fn data_crc(&self) -> Option<u32> { self.data_crc }
    pub fn set_data_crc(&mut self, crc: Option<u32>) { self.data_crc = crc; }
    pub fn data_mark(&self) -> Option<u8> { self.data_mark }
    pub fn set_data_mark(&mut self, m: Option<u8>) { self.data_mark = m; }
    pub fn head_crc(&self) -> Option<u32> { self.head_crc }
    pub fn set_head_crc(&mut self, crc: Option<u32>) { self.head_crc = crc; }
    pub fn head_error(&self) -> Option<i32> { self.head_error }
    pub fn set_head_error(&mut self, e: Option<i32>) { self.head_error = e; }
    pub fn i_modify(&self) -> Option<usize> { self.i_modify }
    pub fn c_modify(&self) -> usize { self.c_modify }
    pub fn file_info(&self) -> Option<usize> { self.file_info }
    pub fn file_offset(&self) -> Option<usize> { self.file_offset }
    pub fn set_file_ref(&mut self, idx: Option<usize>, offset: Option<usize>) {
        self.file_info = idx;
        self.file_offset = offset;
    }
    pub fn clear_file_ref(&mut self) {
        self.file_info = None;
        self.file_offset = None;
    }
    pub fn clear_modify(&mut self) {
        self.i_modify = None;
        self.c_modify = 0;
    }
    /// Raw words as currently stored (compressed form).
    pub fn words(&self) -> &[u32] {
        &self.data
    }

    /// Number of words this sector would occupy fully decompressed.
    fn nwords(&self) -> usize {
        self.length / 4
    }

    /// Decompress into a full-length byte vector of `self.length` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let nwords = self.nwords();
        let mut ans = Vec::with_capacity(self.length);
        let last = *self.data.last().unwrap_or(&0);
        for i in 0..nwords {
            let w = if i < self.data.len() { self.data[i] } else { last };
            ans.extend_from_slice(&w.to_le_bytes());
        }
        ans
    }

    /// Read the byte at `byte_index` within the sector.
    /// Returns `Err(OutOfRange)` when `byte_index >= length`, mirroring the
    /// `-1` sentinel of the source engine.
    pub fn read(&self, byte_index: usize) -> Result<u8,Error> {
        if byte_index >= self.length {
            return Err(Error::OutOfRange);
        }
        if let Some(e) = self.data_error {
            if e < 0 {
                trace!("sector ({},{},{}) flagged data_error, read fails",self.c,self.h,self.id);
                return Err(Error::OutOfRange);
            }
        }
        let word_idx = byte_index / 4;
        let shift = (byte_index % 4) * 8;
        let word = if word_idx < self.data.len() {
            self.data[word_idx]
        } else {
            *self.data.last().expect("unreachable")
        };
        Ok(((word >> shift) & 0xff) as u8)
    }

    /// Write `value` at `byte_index`. Expands the stored word array up to
    /// the target word using the current repeat pattern if necessary, then
    /// updates the minimum contiguous modified-word range covering the
    /// whole write history of this sector.
    pub fn write(&mut self, byte_index: usize, value: u8) -> Result<(),Error> {
        if !self.writable {
            return Err(Error::NotWritable);
        }
        if byte_index >= self.length {
            return Err(Error::OutOfRange);
        }
        let word_idx = byte_index / 4;
        let shift = (byte_index % 4) * 8;
        let current = self.read(byte_index)?;
        if current == value {
            return Ok(());
        }
        if word_idx >= self.data.len() {
            let fill = *self.data.last().expect("unreachable");
            self.data.resize(word_idx + 1, fill);
        }
        let mask = !(0xffu32 << shift);
        self.data[word_idx] = (self.data[word_idx] & mask) | ((value as u32) << shift);
        match self.i_modify {
            None => {
                self.i_modify = Some(word_idx);
                self.c_modify = 1;
            }
            Some(first) => {
                let new_first = first.min(word_idx);
                let new_last = (first + self.c_modify - 1).max(word_idx);
                self.i_modify = Some(new_first);
                self.c_modify = new_last - new_first + 1;
            }
        }
        Ok(())
    }

    /// Sum of words `[0..cdw)` contributing to the image-wide checksum,
    /// excluding the final repeated pattern whenever the sector is stored
    /// in compressed (less-than-full) form. This asymmetry matches the
    /// source engine and is intentionally not "fixed" for full sectors.
    pub fn checksum_contribution(&self) -> u32 {
        let nwords = self.nwords();
        let cdw = if self.data.len() < nwords {
            self.data.len().saturating_sub(1)
        } else {
            self.data.len()
        };
        let mut sum: u32 = 0;
        for i in 0..cdw {
            sum = sum.wrapping_add(self.data[i]);
        }
        sum
    }
}

/// Sum the checksum contributions of every sector in iteration order.
pub fn image_checksum<'a>(sectors: impl Iterator<Item=&'a Sector>) -> u32 {
    let mut sum: u32 = 0;
    for s in sectors {
        sum = sum.wrapping_add(s.checksum_contribution());
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_from_buffer_compresses_trailing_run() {
        let mut buf = vec![0u8;512];
        buf[0] = 0xaa;
        let sec = Sector::from_buffer(0,0,1,512,&buf,0).unwrap();
        assert!(sec.words().len() < 512/4);
        assert_eq!(sec.to_bytes().len(),512);
        assert_eq!(sec.to_bytes(),buf);
    }

    #[test]
    fn test_read_out_of_range() {
        let buf = vec![0u8;512];
        let sec = Sector::from_buffer(0,0,1,512,&buf,0).unwrap();
        assert!(sec.read(511).is_ok());
        assert!(matches!(sec.read(512),Err(Error::OutOfRange)));
    }

    #[test]
    fn test_write_tracks_modify_range() {
        // Scenario S6 from the spec: write 0x41 at byte 100 of a zeroed sector.
        let buf = vec![0u8;512];
        let mut sec = Sector::from_buffer(0,0,1,512,&buf,0).unwrap();
        sec.write(100,0x41).unwrap();
        assert_eq!(sec.c_modify(),1);
        assert_eq!(sec.i_modify(),Some(25));
        sec.write(50,0x42).unwrap();
        assert_eq!(sec.i_modify(),Some(12));
        assert_eq!(sec.c_modify(),14);
        assert_eq!(sec.read(100).unwrap(),0x41);
        assert_eq!(sec.read(50).unwrap(),0x42);
    }

    #[test]
    fn test_data_error_blocks_read() {
        let buf = vec![0u8;512];
        let mut sec = Sector::from_buffer(0,0,1,512,&buf,0).unwrap();
        sec.set_data_error(Some(-1));
        assert!(sec.read(0).is_err());
    }

    #[test]
    fn test_checksum_excludes_trailing_pattern_when_compressed() {
        let mut buf = vec![0u8;512];
        buf[0..4].copy_from_slice(&1u32.to_le_bytes());
        buf[4..8].copy_from_slice(&2u32.to_le_bytes());
        let sec = Sector::from_buffer(0,0,1,512,&buf,0).unwrap();
        // words = [1,2,0], cdw = len-1 = 2 -> sum = 1+2 = 3
        assert_eq!(sec.checksum_contribution(),3);
    }
}
