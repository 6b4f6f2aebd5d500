//! Shared data types and error hierarchy for the sidesplitter pipeline.
//!
//! Ported from the algorithmic core of SIDESPLITTER (Aylett & Palmer).

mod error;
mod shell;
mod volume;

pub use error::SidesplitterError;
pub use shell::{Shell, ShellList};
pub use volume::{ComplexVolume, Mask, Volume};
