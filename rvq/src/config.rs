use serde::{Deserialize, Serialize};

use crate::RvqError;

/// Controls quantizer shape and codebook training behavior.
///
/// Every field has a default, so a JSON config only needs to name
/// the values it changes:
///
/// ```
/// use openmusiclm_rvq::RvqConfig;
///
/// let cfg = RvqConfig::from_json(br#"{"dim": 512, "num_quantizers": 8}"#).unwrap();
/// assert_eq!(cfg.codebook_size, 1024);
/// assert_eq!(cfg.num_quantizers, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RvqConfig {
    /// Dimension of the vectors being quantized.
    pub dim: usize,

    /// Number of codewords per stage.
    /// Default: 1024.
    pub codebook_size: usize,

    /// Number of residual stages.
    /// Default: 12.
    pub num_quantizers: usize,

    /// EMA decay for codebook updates. Closer to 1 = slower updates.
    /// Default: 0.95.
    pub decay: f64,

    /// Laplace smoothing constant for cluster sizes.
    /// Default: 1e-5.
    pub eps: f64,

    /// Scale of the commitment loss. 0 disables it.
    /// Default: 0.
    pub commitment_weight: f64,

    /// Initialize codebooks from the first batch with k-means.
    /// Default: true.
    pub kmeans_init: bool,

    /// Lloyd iterations for k-means initialization and revival.
    /// Default: 10.
    pub kmeans_iters: usize,

    /// Codewords whose EMA cluster size drops below this are replaced.
    /// 0 disables revival.
    /// Default: 2.
    pub threshold_ema_dead_code: f64,

    /// Seed for codebook sampling. Stage `i` uses `seed + i`.
    pub seed: u64,
}

impl Default for RvqConfig {
    fn default() -> Self {
        Self {
            dim: 512,
            codebook_size: 1024,
            num_quantizers: 12,
            decay: 0.95,
            eps: 1e-5,
            commitment_weight: 0.0,
            kmeans_init: true,
            kmeans_iters: 10,
            threshold_ema_dead_code: 2.0,
            seed: 0,
        }
    }
}

impl RvqConfig {
    /// Default config for vectors of the given dimension.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ..Self::default()
        }
    }

    /// Parses a JSON config. Missing fields take their defaults.
    pub fn from_json(data: &[u8]) -> Result<Self, RvqError> {
        let cfg: Self = serde_json::from_slice(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_codebook_size(mut self, size: usize) -> Self {
        self.codebook_size = size;
        self
    }

    pub fn with_num_quantizers(mut self, n: usize) -> Self {
        self.num_quantizers = n;
        self
    }

    pub fn with_decay(mut self, decay: f64) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Checks that the config describes a usable quantizer.
    pub fn validate(&self) -> Result<(), RvqError> {
        if self.dim == 0 {
            return Err(RvqError::InvalidConfig("dim must be positive".into()));
        }
        if self.codebook_size == 0 {
            return Err(RvqError::InvalidConfig(
                "codebook_size must be positive".into(),
            ));
        }
        if self.codebook_size > u32::MAX as usize {
            return Err(RvqError::InvalidConfig(format!(
                "codebook_size {} does not fit u32 indices",
                self.codebook_size
            )));
        }
        if self.num_quantizers == 0 {
            return Err(RvqError::InvalidConfig(
                "num_quantizers must be positive".into(),
            ));
        }
        if !(self.decay > 0.0 && self.decay < 1.0) {
            return Err(RvqError::InvalidConfig(format!(
                "decay must be in (0, 1), got {}",
                self.decay
            )));
        }
        if self.eps < 0.0 || self.commitment_weight < 0.0 || self.threshold_ema_dead_code < 0.0 {
            return Err(RvqError::InvalidConfig(
                "eps, commitment_weight and threshold_ema_dead_code must be non-negative".into(),
            ));
        }
        Ok(())
    }
}
