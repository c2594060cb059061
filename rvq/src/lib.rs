//! Residual vector quantization (RVQ) over candle tensors.
//!
//! Each stage quantizes the residual left over by the previous stage
//! against its own codebook. The output of a forward pass is one codeword
//! index per stage for every input vector.
//!
//! # Usage
//!
//! ```no_run
//! use candle::{Device, Tensor};
//! use openmusiclm_rvq::{ResidualVq, RvqConfig};
//!
//! let device = Device::Cpu;
//! let mut rq = ResidualVq::new(RvqConfig::new(512), &device)?;
//!
//! // [batch, seq, dim]
//! let x = Tensor::randn(0f32, 1f32, (1, 8, 512), &device)?;
//! let out = rq.forward(&x, false)?;
//! assert_eq!(out.indices.dims(), &[1, 8, 12]);
//! # Ok::<(), openmusiclm_rvq::RvqError>(())
//! ```
//!
//! # Codebook Lifecycle
//!
//! With `kmeans_init` enabled, codebooks start empty and are initialized
//! from the first batch they see via k-means, in training and inference
//! alike. After that, [`ResidualVq::forward`] with `train = true` moves
//! codewords toward the mean of their assigned residuals with an
//! exponential moving average, and codewords whose running usage falls
//! below `threshold_ema_dead_code` are replaced with fresh k-means
//! centroids of the current batch. With `train = false` the codebooks
//! are read-only once initialized.
//!
//! To checkpoint a quantizer, save [`ResidualVq::codebooks`] together with
//! [`ResidualVq::ema_states`] and pass both back to
//! [`ResidualVq::from_codebooks`].

mod codebook;
mod config;
mod error;
pub mod kmeans;
mod rvq;

pub use codebook::{EmaState, EuclideanCodebook};
pub use config::RvqConfig;
pub use error::RvqError;
pub use kmeans::kmeans;
pub use rvq::{ResidualVq, RvqOutput};
