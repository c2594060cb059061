//! Discrete tokens from a frozen contrastive language-audio (CLAP) model.
//!
//! [`ClapQuantized`] runs either the audio or the text tower of a
//! [`JointEmbedder`] and residual-quantizes the resulting joint embeddings
//! into `num_quantizers` codeword indices per item. The wrapped model is
//! only ever reached through `&self`, so its parameters stay frozen; only
//! the quantizer's codebooks learn.
//!
//! Which tower runs is decided by the [`EmbedInput`] variant, so a call
//! always carries exactly one of audio or text.

mod config;
mod error;
mod model;
mod quantized;

pub use config::{ClapConfig, QuantizerOptions};
pub use error::ClapError;
pub use model::{AudioFeatures, JointEmbedder, TextTokens};
pub use quantized::{ClapQuantized, EmbedInput};
