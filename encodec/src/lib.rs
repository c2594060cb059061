//! Token grids from a frozen neural audio codec.
//!
//! The codec quantizes audio itself; [`EncodecWrapper`] only moves its
//! codes between the codec's `[batch, n_q, time]` layout and the
//! `[batch, time, n_q]` layout the generation pipeline consumes, and back.
//!
//! # Bandwidth
//!
//! A codec running at `bandwidth` kbps uses
//! `round(bandwidth / 24 * total_quantizers)` of its quantizer stages:
//!
//! ```text
//!  1.5 kbps ->  2 of 32
//!  3   kbps ->  4 of 32
//!  6   kbps ->  8 of 32
//! 12   kbps -> 16 of 32
//! 24   kbps -> 32 of 32
//! ```

mod bandwidth;
mod error;
mod model;
mod wrapper;

pub use bandwidth::Bandwidth;
pub use error::EncodecError;
pub use model::{EncodedFrame, NeuralCodec};
pub use wrapper::{ENCODEC_24KHZ_SAMPLE_RATE, EncodecWrapper, create_encodec_24khz};
