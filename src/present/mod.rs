//! ## Presenters
//!
//! Human- and machine-readable views over a decoded `DiskImage`, split the
//! way the teacher splits `fs::fat::display` (directory listings) from its
//! JSON import/export methods on `img::DiskImage`/`fs::FileImage`. Unlike
//! the teacher's CLI-facing `display` module, these presenters return owned
//! `String`s rather than printing to stdout, since this crate is a library
//! with no terminal of its own.

pub mod listing;
pub mod json;
pub mod manifest;

use thiserror::Error;

#[derive(Error,Debug)]
pub enum Error {
    #[error("no volume at index {0}")]
    NoSuchVolume(usize)
}
