use std::sync::Arc;

use candle::{Device, Tensor};
use openmusiclm_rvq::ResidualVq;
use tracing::debug;

use crate::model::{AudioFeatures, JointEmbedder, TextTokens};
use crate::{ClapConfig, ClapError, QuantizerOptions};

/// Input to [`ClapQuantized::forward`]: a batch for exactly one tower.
#[derive(Debug, Clone)]
pub enum EmbedInput {
    /// Audio clips for the audio tower.
    Audio(Vec<AudioFeatures>),
    /// Tokenized texts for the text tower.
    Text(TextTokens),
}

impl EmbedInput {
    /// Returns the number of items in the batch.
    pub fn len(&self) -> usize {
        match self {
            Self::Audio(clips) => clips.len(),
            Self::Text(tokens) => tokens.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Quantized embeddings from a frozen CLAP model.
///
/// Audio or text is embedded by the shared, read-only model, and the
/// `N` embeddings of a batch are residual-quantized as one sequence.
/// The result is `[1, N, num_quantizers]` codeword indices.
///
/// The quantizer starts in inference mode. Call
/// [`ClapQuantized::set_training`] to let its codebooks follow the
/// embeddings with EMA updates.
pub struct ClapQuantized<M> {
    clap: Arc<M>,
    clap_cfg: ClapConfig,
    rq: ResidualVq,
    training: bool,
}

impl<M: JointEmbedder> ClapQuantized<M> {
    /// Creates a quantizer over `clap`'s joint embedding space with
    /// freshly k-means-initialized codebooks.
    pub fn new(
        clap: Arc<M>,
        clap_cfg: ClapConfig,
        opts: &QuantizerOptions,
        device: &Device,
    ) -> Result<Self, ClapError> {
        let rq = ResidualVq::new(opts.rvq_config(clap.joint_embed_dim()), device)?;
        Ok(Self {
            clap,
            clap_cfg,
            rq,
            training: false,
        })
    }

    /// Creates a quantizer around an existing (e.g. restored) [`ResidualVq`].
    /// Its dimension must match the model's joint embedding.
    pub fn with_quantizer(
        clap: Arc<M>,
        clap_cfg: ClapConfig,
        rq: ResidualVq,
    ) -> Result<Self, ClapError> {
        let dim = clap.joint_embed_dim();
        if rq.config().dim != dim {
            return Err(ClapError::DimensionMismatch {
                expected: dim,
                got: rq.config().dim,
            });
        }
        Ok(Self {
            clap,
            clap_cfg,
            rq,
            training: false,
        })
    }

    /// Embeds `input` with the matching tower and returns its codeword
    /// indices, `[1, N, num_quantizers]` (`u32`).
    ///
    /// The quantized vectors and the commitment loss are discarded.
    pub fn forward(&mut self, input: &EmbedInput) -> Result<Tensor, ClapError> {
        if input.is_empty() {
            return Err(ClapError::EmptyInput);
        }

        let embedding = match input {
            EmbedInput::Audio(clips) => self.clap.get_audio_embedding(clips)?,
            EmbedInput::Text(tokens) => self.clap.get_text_embedding(tokens)?,
        };
        debug!(shape = ?embedding.dims(), "clap: joint embedding");

        let dim = self.clap.joint_embed_dim();
        match embedding.dims() {
            &[_, d] if d == dim => {}
            &[_, d] => {
                return Err(ClapError::DimensionMismatch {
                    expected: dim,
                    got: d,
                });
            }
            other => {
                return Err(ClapError::Shape {
                    expected: 2,
                    got: other.to_vec(),
                });
            }
        }

        // [N, D] -> [1, N, D]: the batch becomes one sequence.
        let seq = embedding.unsqueeze(0)?;
        let out = self.rq.forward(&seq, self.training)?;
        Ok(out.indices)
    }

    /// Switches codebook EMA updates on or off. The CLAP model is
    /// unaffected either way.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Returns the wrapped model.
    pub fn clap(&self) -> &M {
        &self.clap
    }

    pub fn clap_cfg(&self) -> &ClapConfig {
        &self.clap_cfg
    }

    /// Returns the residual quantizer, e.g. for checkpointing its codebooks.
    pub fn quantizer(&self) -> &ResidualVq {
        &self.rq
    }

    pub fn num_quantizers(&self) -> usize {
        self.rq.num_quantizers()
    }

    pub fn codebook_size(&self) -> usize {
        self.rq.codebook_size()
    }
}
