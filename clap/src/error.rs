use thiserror::Error;

/// Errors returned by clap operations.
#[derive(Debug, Error)]
pub enum ClapError {
    #[error("clap: model error: {0}")]
    Model(String),

    #[error("clap: empty input")]
    EmptyInput,

    #[error("clap: dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("clap: expected a rank {expected} embedding, got shape {got:?}")]
    Shape { expected: usize, got: Vec<usize> },

    #[error("clap: parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Quantizer(#[from] openmusiclm_rvq::RvqError),

    #[error("clap: tensor error: {0}")]
    Tensor(#[from] candle::Error),
}
