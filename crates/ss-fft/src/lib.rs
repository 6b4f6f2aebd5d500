//! 3D real/complex FFT with plan caching, and the strided parallel-for that
//! every kernel runs through.

mod engine;
mod parallel;

pub use engine::FftEngine;
pub use parallel::ParallelFor;
