use thiserror::Error;

/// Failures that can occur inside the parallel-for / kernel layer, shared by
/// `ss-fft`, `ss-kernels`, and `ss-pipeline`.
///
/// Input-format and I/O errors are defined closer to where they occur
/// (`ss-io::HeaderError`, `ss_pipeline::PipelineError`) and folded into a
/// single top-level error at the CLI boundary.
#[derive(Debug, Error)]
pub enum SidesplitterError {
    #[error("worker thread failed to start: {0}")]
    ThreadSpawn(String),

    #[error("worker thread panicked before rejoining: {0}")]
    ThreadJoin(String),

    #[error("buffer allocation failed: {0}")]
    Allocation(String),
}
