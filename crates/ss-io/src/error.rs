use thiserror::Error;

/// Failures reading, validating, or writing an MRC volume.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("header truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("unsupported MRC mode {mode}; only mode 2 (float32) is accepted")]
    UnsupportedMode { mode: i32 },

    #[error("non-cube volume: NX={nx} NY={ny} NZ={nz}")]
    NotCube { nx: i32, ny: i32, nz: i32 },

    #[error("data region truncated: expected {expected} voxels, got {got}")]
    DataTruncated { expected: usize, got: usize },
}
