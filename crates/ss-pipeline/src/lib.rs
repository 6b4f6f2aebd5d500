//! The two-pass Fourier-shell denoising pipeline.
//!
//! Ported from `main.c`: loads/masks the inputs, walks Pass 1 forward and
//! Pass 2 backward over a shared shell list, optionally re-normalises and
//! re-applies the input spectrum, and hands back the two denoised volumes.

mod error;
pub mod pass1;
pub mod pass2;
pub mod pass3;
pub mod pipeline;

pub use error::PipelineError;
pub use pipeline::{run, PipelineOutcome, RunConfig};
