use std::sync::Arc;

use candle::Tensor;
use tracing::debug;

use crate::model::{EncodedFrame, NeuralCodec};
use crate::{Bandwidth, EncodecError};

/// Sample rate of the 24 kHz EnCodec model.
pub const ENCODEC_24KHZ_SAMPLE_RATE: usize = 24_000;

/// Exposes a frozen codec's own quantized codes as `[B, T, n_q]` token grids.
///
/// The codec is shared and only used through `&self`. The number of
/// informative stages is derived from its bandwidth once, at construction.
pub struct EncodecWrapper<C> {
    codec: Arc<C>,
    sample_rate: usize,
    bandwidth: Bandwidth,
    num_quantizers: usize,
}

impl<C: NeuralCodec> EncodecWrapper<C> {
    /// Wraps a codec whose target bandwidth is already set.
    pub fn new(codec: Arc<C>) -> Result<Self, EncodecError> {
        let kbps = codec.bandwidth().ok_or(EncodecError::MissingBandwidth)?;
        let bandwidth = Bandwidth::try_from(kbps)?;
        let num_quantizers = bandwidth.num_quantizers(codec.total_quantizers());
        debug!(
            %bandwidth,
            num_quantizers,
            total = codec.total_quantizers(),
            "encodec: wrapper ready"
        );
        Ok(Self {
            sample_rate: codec.sample_rate(),
            codec,
            bandwidth,
            num_quantizers,
        })
    }

    /// Encodes a waveform into its token grid.
    ///
    /// `wav` is `[B, T]` (mono, a channel axis is added) or `[B, C, T]`
    /// with `C` matching the codec.
    /// Frames from the codec are joined along time and returned as
    /// `[B, T', n_q]`.
    pub fn encode(&self, wav: &Tensor) -> Result<Tensor, EncodecError> {
        let wav = match wav.rank() {
            2 => wav.unsqueeze(1)?,
            3 => wav.clone(),
            _ => {
                return Err(EncodecError::Shape {
                    expected: "2 or 3",
                    got: wav.dims().to_vec(),
                });
            }
        };
        let channels = wav.dim(1)?;
        if channels != self.codec.channels() {
            return Err(EncodecError::ChannelMismatch {
                expected: self.codec.channels(),
                got: channels,
            });
        }

        let frames = self.codec.encode(&wav)?;
        if frames.is_empty() {
            return Err(EncodecError::NoFrames);
        }
        let chunks: Vec<&Tensor> = frames.iter().map(|f| &f.codes).collect();
        let codes = Tensor::cat(&chunks, 2)?; // [B, n_q, T]
        debug!(frames = frames.len(), shape = ?codes.dims(), "encodec: encoded");

        Ok(codes.transpose(1, 2)?.contiguous()?)
    }

    /// Pipeline entry point: returns `(None, codes, None)` with codes as in
    /// [`EncodecWrapper::encode`]. Only the quantized path exists, so
    /// `return_encoded` must be true.
    pub fn forward(
        &self,
        wav: &Tensor,
        return_encoded: bool,
    ) -> Result<(Option<Tensor>, Tensor, Option<Tensor>), EncodecError> {
        if !return_encoded {
            return Err(EncodecError::UnsupportedReturnMode);
        }
        Ok((None, self.encode(wav)?, None))
    }

    /// Reconstructs a waveform from a `[B, T, n_q]` token grid.
    ///
    /// The whole grid is decoded as a single frame.
    pub fn decode_from_codebook_indices(&self, codes: &Tensor) -> Result<Tensor, EncodecError> {
        if codes.rank() != 3 {
            return Err(EncodecError::Shape {
                expected: "3",
                got: codes.dims().to_vec(),
            });
        }
        let codes = codes.transpose(1, 2)?.contiguous()?; // [B, n_q, T]
        let frames = [EncodedFrame::new(codes)];
        self.codec.decode(&frames)
    }

    /// Returns the wrapped codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    /// Quantizer stages carrying information at the codec's bandwidth.
    pub fn num_quantizers(&self) -> usize {
        self.num_quantizers
    }
}

/// Wraps a pretrained 24 kHz EnCodec model running at `bandwidth` kbps.
///
/// `bandwidth` must be one of 1.5, 3, 6, 12 or 24.
pub fn create_encodec_24khz<C: NeuralCodec>(
    mut codec: C,
    bandwidth: f64,
) -> Result<EncodecWrapper<C>, EncodecError> {
    let bandwidth = Bandwidth::try_from(bandwidth)?;
    if codec.sample_rate() != ENCODEC_24KHZ_SAMPLE_RATE {
        return Err(EncodecError::SampleRateMismatch {
            expected: ENCODEC_24KHZ_SAMPLE_RATE,
            got: codec.sample_rate(),
        });
    }
    codec.set_target_bandwidth(bandwidth.kbps())?;
    EncodecWrapper::new(Arc::new(codec))
}
