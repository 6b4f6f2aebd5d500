//! MRC volumetric file reading and writing.
//!
//! Ported from `read_mrc`/`write_mrc` in `interact.c`.

mod error;
mod mrc;

pub use error::HeaderError;
pub use mrc::{read_volume, write_volume, MrcHeader, HEADER_BYTES, MODE_FLOAT32};
