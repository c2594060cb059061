use candle::{DType, Device, Tensor};
use tracing::trace;

use crate::codebook::{EmaState, EuclideanCodebook};
use crate::{RvqConfig, RvqError};

/// Result of a [`ResidualVq::forward`] pass.
#[derive(Debug, Clone)]
pub struct RvqOutput {
    /// Sum of the selected codewords, `[B, N, D]`.
    pub quantized: Tensor,

    /// Selected codeword per stage, `[B, N, Q]` (`u32`).
    pub indices: Tensor,

    /// Commitment loss summed over stages. Zero when
    /// `commitment_weight` is 0.
    pub loss: Tensor,
}

/// Multi-stage residual vector quantizer.
///
/// Stage `q` quantizes what stages `0..q` could not represent:
///
/// ```text
/// residual_0 = x
/// idx_q      = argmin_k |residual_q - C_q[k]|
/// residual_q+1 = residual_q - C_q[idx_q]
/// ```
pub struct ResidualVq {
    cfg: RvqConfig,
    layers: Vec<EuclideanCodebook>,
    device: Device,
}

impl ResidualVq {
    /// Creates a quantizer with `cfg.num_quantizers` fresh codebooks.
    pub fn new(cfg: RvqConfig, device: &Device) -> Result<Self, RvqError> {
        cfg.validate()?;
        let layers = (0..cfg.num_quantizers)
            .map(|i| EuclideanCodebook::new(&cfg, cfg.seed.wrapping_add(i as u64), device))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            cfg,
            layers,
            device: device.clone(),
        })
    }

    /// Creates a quantizer from trained codewords, one `[K, D]` tensor per stage.
    ///
    /// `ema` holds the per-stage training statistics saved with
    /// [`ResidualVq::ema_states`]; see [`EuclideanCodebook::from_embed`] for
    /// how stages start without them.
    pub fn from_codebooks(
        cfg: RvqConfig,
        codebooks: Vec<Tensor>,
        ema: Option<Vec<EmaState>>,
    ) -> Result<Self, RvqError> {
        cfg.validate()?;
        if codebooks.len() != cfg.num_quantizers {
            return Err(RvqError::DimensionMismatch {
                expected: cfg.num_quantizers,
                got: codebooks.len(),
            });
        }
        let states: Vec<Option<EmaState>> = match ema {
            Some(states) if states.len() != codebooks.len() => {
                return Err(RvqError::DimensionMismatch {
                    expected: codebooks.len(),
                    got: states.len(),
                });
            }
            Some(states) => states.into_iter().map(Some).collect(),
            None => vec![None; codebooks.len()],
        };
        let device = match codebooks.first() {
            Some(t) => t.device().clone(),
            None => Device::Cpu,
        };
        let layers = codebooks
            .into_iter()
            .zip(states)
            .enumerate()
            .map(|(i, (embed, state))| {
                EuclideanCodebook::from_embed(&cfg, cfg.seed.wrapping_add(i as u64), embed, state)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            cfg,
            layers,
            device,
        })
    }

    pub fn config(&self) -> &RvqConfig {
        &self.cfg
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns the number of stages.
    pub fn num_quantizers(&self) -> usize {
        self.layers.len()
    }

    pub fn codebook_size(&self) -> usize {
        self.cfg.codebook_size
    }

    /// Returns the per-stage codebooks in stage order.
    pub fn layers(&self) -> &[EuclideanCodebook] {
        &self.layers
    }

    /// Returns each stage's codewords, `[K, D]`, in stage order.
    pub fn codebooks(&self) -> Vec<&Tensor> {
        self.layers.iter().map(|l| l.embed()).collect()
    }

    /// Returns each stage's training statistics, in stage order.
    pub fn ema_states(&self) -> Vec<EmaState> {
        self.layers.iter().map(|l| l.ema_state()).collect()
    }

    /// Returns true once every stage has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.layers.iter().all(|l| l.is_initialized())
    }

    /// Quantizes `x` (`[B, N, D]`).
    ///
    /// Uninitialized stages are seeded from the residuals they receive.
    /// With `train`, every stage is EMA-updated and revives its dead codes
    /// after quantizing.
    pub fn forward(&mut self, x: &Tensor, train: bool) -> Result<RvqOutput, RvqError> {
        let (b, n, d) = self.check_input(x)?;
        let x = x.to_dtype(DType::F32)?.reshape((b * n, d))?;

        let mut residual = x.clone();
        let mut quantized = x.zeros_like()?;
        let mut loss = Tensor::zeros((), DType::F32, x.device())?;
        let mut all_indices = Vec::with_capacity(self.layers.len());
        let weight = self.cfg.commitment_weight;

        for (stage, layer) in self.layers.iter_mut().enumerate() {
            let (q, idx) = layer.forward(&residual, train)?;
            if weight > 0.0 {
                let commit = (&q - &residual)?.sqr()?.mean_all()?.affine(weight, 0.0)?;
                loss = (loss + commit)?;
            }
            residual = (&residual - &q)?;
            quantized = (&quantized + &q)?;
            all_indices.push(idx);
            trace!(stage, train, "rvq: stage quantized");
        }

        let q = all_indices.len();
        let indices = Tensor::stack(&all_indices, 1)?.reshape((b, n, q))?;
        Ok(RvqOutput {
            quantized: quantized.reshape((b, n, d))?,
            indices,
            loss,
        })
    }

    /// Returns the codeword indices for `x` (`[B, N, D]`) as `[B, N, Q]`
    /// without touching the codebooks. Every stage must be initialized.
    pub fn encode(&self, x: &Tensor) -> Result<Tensor, RvqError> {
        if let Some(stage) = self.layers.iter().position(|l| !l.is_initialized()) {
            return Err(RvqError::NotInitialized(stage));
        }
        let (b, n, d) = self.check_input(x)?;
        let mut residual = x.to_dtype(DType::F32)?.reshape((b * n, d))?;

        let mut all_indices = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let idx = layer.quantize(&residual)?;
            residual = (&residual - layer.dequantize(&idx)?)?;
            all_indices.push(idx);
        }

        let q = all_indices.len();
        Ok(Tensor::stack(&all_indices, 1)?.reshape((b, n, q))?)
    }

    /// Sums the codewords selected by `indices` (`[B, N, Q]`) into `[B, N, D]`.
    pub fn decode(&self, indices: &Tensor) -> Result<Tensor, RvqError> {
        let (b, n, q) = match indices.dims() {
            &[b, n, q] => (b, n, q),
            other => {
                return Err(RvqError::Shape {
                    expected: 3,
                    got: other.to_vec(),
                });
            }
        };
        if q != self.layers.len() {
            return Err(RvqError::DimensionMismatch {
                expected: self.layers.len(),
                got: q,
            });
        }

        let flat = indices.to_dtype(DType::U32)?.reshape((b * n, q))?;
        let size = self.cfg.codebook_size;
        if let Some(&bad) = flat
            .flatten_all()?
            .to_vec1::<u32>()?
            .iter()
            .find(|&&i| i as usize >= size)
        {
            return Err(RvqError::IndexOutOfRange { index: bad, size });
        }

        let mut out = Tensor::zeros((b * n, self.cfg.dim), DType::F32, &self.device)?;
        for (stage, layer) in self.layers.iter().enumerate() {
            let idx = flat.narrow(1, stage, 1)?.squeeze(1)?.contiguous()?;
            out = (out + layer.dequantize(&idx)?)?;
        }
        Ok(out.reshape((b, n, self.cfg.dim))?)
    }

    fn check_input(&self, x: &Tensor) -> Result<(usize, usize, usize), RvqError> {
        let (b, n, d) = match x.dims() {
            &[b, n, d] => (b, n, d),
            other => {
                return Err(RvqError::Shape {
                    expected: 3,
                    got: other.to_vec(),
                });
            }
        };
        if d != self.cfg.dim {
            return Err(RvqError::DimensionMismatch {
                expected: self.cfg.dim,
                got: d,
            });
        }
        if b * n == 0 {
            return Err(RvqError::EmptyInput);
        }
        Ok((b, n, d))
    }
}
