use candle::Tensor;

use crate::EncodecError;

/// One time chunk of codec output.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Quantizer indices, `[B, n_q, T]`.
    pub codes: Tensor,

    /// Per-item loudness scale when the codec normalizes its input.
    pub scale: Option<Tensor>,
}

impl EncodedFrame {
    pub fn new(codes: Tensor) -> Self {
        Self { codes, scale: None }
    }
}

/// A pretrained neural audio codec with its own residual quantizer.
///
/// `encode` may split long inputs into several frames; `decode` accepts
/// any sequence of frames with the same stage count.
pub trait NeuralCodec {
    /// Native sample rate in Hz (e.g., 24000).
    fn sample_rate(&self) -> usize;

    /// Audio channels the codec expects (1 for mono).
    fn channels(&self) -> usize;

    /// Current target bandwidth in kbps, if one is set.
    fn bandwidth(&self) -> Option<f64>;

    /// Selects the target bandwidth, which decides how many quantizer
    /// stages carry information.
    fn set_target_bandwidth(&mut self, kbps: f64) -> Result<(), EncodecError>;

    /// Number of quantizer stages the codec has in total.
    fn total_quantizers(&self) -> usize;

    /// Encodes a waveform `[B, C, T]` into frames.
    fn encode(&self, wav: &Tensor) -> Result<Vec<EncodedFrame>, EncodecError>;

    /// Reconstructs a waveform `[B, C, T]` from frames.
    fn decode(&self, frames: &[EncodedFrame]) -> Result<Tensor, EncodecError>;
}
