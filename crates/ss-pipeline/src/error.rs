use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Header(#[from] ss_io::HeaderError),

    #[error(transparent)]
    Kernel(#[from] ss_core::SidesplitterError),

    #[error("input volumes are not cubes of equal size")]
    SizeMismatch,
}
