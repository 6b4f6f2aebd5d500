pub mod fourier;
pub mod realspace;
