use thiserror::Error;

/// Errors returned by encodec operations.
#[derive(Debug, Error)]
pub enum EncodecError {
    #[error("encodec: unsupported bandwidth {0} kbps (want 1.5, 3, 6, 12 or 24)")]
    UnsupportedBandwidth(f64),

    #[error("encodec: codec has no target bandwidth set")]
    MissingBandwidth,

    #[error("encodec: sample rate mismatch: expected {expected}, got {got}")]
    SampleRateMismatch { expected: usize, got: usize },

    #[error("encodec: channel mismatch: expected {expected}, got {got}")]
    ChannelMismatch { expected: usize, got: usize },

    #[error("encodec: only quantized codes can be returned")]
    UnsupportedReturnMode,

    #[error("encodec: expected a tensor of rank {expected}, got shape {got:?}")]
    Shape { expected: &'static str, got: Vec<usize> },

    #[error("encodec: codec produced no frames")]
    NoFrames,

    #[error("encodec: codec error: {0}")]
    Codec(String),

    #[error("encodec: tensor error: {0}")]
    Tensor(#[from] candle::Error),
}
