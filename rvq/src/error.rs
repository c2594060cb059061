use thiserror::Error;

/// Errors returned by rvq operations.
#[derive(Debug, Error)]
pub enum RvqError {
    #[error("rvq: invalid config: {0}")]
    InvalidConfig(String),

    #[error("rvq: dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("rvq: expected a rank {expected} tensor, got shape {got:?}")]
    Shape { expected: usize, got: Vec<usize> },

    #[error("rvq: codeword index {index} out of range for codebook size {size}")]
    IndexOutOfRange { index: u32, size: usize },

    #[error("rvq: codebook {0} is not initialized")]
    NotInitialized(usize),

    #[error("rvq: empty input")]
    EmptyInput,

    #[error("rvq: parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("rvq: tensor error: {0}")]
    Tensor(#[from] candle::Error),
}
