use serde::{Deserialize, Serialize};

use crate::ClapError;

/// Audio front-end settings the wrapped CLAP model was trained with.
///
/// The quantizer never reads these; they travel with it so downstream
/// feature extraction can prepare audio the way the model expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClapConfig {
    /// Default: 48000.
    pub sample_rate: usize,
    /// Spectrogram frames per window. Default: 1024.
    pub audio_length: usize,
    /// STFT window in samples. Default: 1024.
    pub window_size: usize,
    /// STFT hop in samples. Default: 480.
    pub hop_size: usize,
    /// Default: 64.
    pub mel_bins: usize,
    /// Default: 50.
    pub fmin: usize,
    /// Default: 14000.
    pub fmax: usize,
    /// Fuse global and local mel views for long clips. Default: false.
    pub enable_fusion: bool,
}

impl Default for ClapConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            audio_length: 1024,
            window_size: 1024,
            hop_size: 480,
            mel_bins: 64,
            fmin: 50,
            fmax: 14_000,
            enable_fusion: false,
        }
    }
}

impl ClapConfig {
    /// Parses a JSON config. Missing fields take their defaults.
    pub fn from_json(data: &[u8]) -> Result<Self, ClapError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Number of waveform samples covered by one model window.
    pub fn max_samples(&self) -> usize {
        self.audio_length * self.hop_size
    }
}

/// Residual quantizer settings for [`crate::ClapQuantized`].
///
/// The dead-code threshold (2) and commitment weight (0, the embeddings
/// are frozen) are fixed, and codebooks are always k-means initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerOptions {
    /// Codewords per stage. Default: 1024.
    pub codebook_size: usize,
    /// Residual stages. Default: 12.
    pub num_quantizers: usize,
    /// EMA decay for codebook updates. Default: 0.95.
    pub ema_decay: f64,
    /// Seed for codebook sampling. Default: 0.
    pub seed: u64,
}

impl Default for QuantizerOptions {
    fn default() -> Self {
        Self {
            codebook_size: 1024,
            num_quantizers: 12,
            ema_decay: 0.95,
            seed: 0,
        }
    }
}

impl QuantizerOptions {
    pub(crate) const THRESHOLD_EMA_DEAD_CODE: f64 = 2.0;

    /// Builds the residual quantizer config for embeddings of dimension `dim`.
    pub fn rvq_config(&self, dim: usize) -> openmusiclm_rvq::RvqConfig {
        openmusiclm_rvq::RvqConfig {
            dim,
            codebook_size: self.codebook_size,
            num_quantizers: self.num_quantizers,
            decay: self.ema_decay,
            commitment_weight: 0.0,
            kmeans_init: true,
            threshold_ema_dead_code: Self::THRESHOLD_EMA_DEAD_CODE,
            seed: self.seed,
            ..Default::default()
        }
    }
}
