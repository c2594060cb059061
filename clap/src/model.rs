use candle::Tensor;

use crate::ClapError;

/// Audio features for one clip, as produced by the CLAP audio front-end.
#[derive(Debug, Clone)]
pub struct AudioFeatures {
    /// Mono waveform at the model's sample rate, `[T]`.
    pub waveform: Tensor,

    /// Set when the clip was longer than the model's window and had to be
    /// cropped or fused.
    pub longer: bool,

    /// Stacked mel spectrograms for feature fusion. `None` unless the
    /// model was built with fusion enabled.
    pub mel_fusion: Option<Tensor>,
}

impl AudioFeatures {
    pub fn new(waveform: Tensor) -> Self {
        Self {
            waveform,
            longer: false,
            mel_fusion: None,
        }
    }
}

/// Tokenized text batch for the CLAP text tower.
#[derive(Debug, Clone)]
pub struct TextTokens {
    /// Token ids, `[N, L]`.
    pub input_ids: Tensor,

    /// 1 for real tokens, 0 for padding, `[N, L]`.
    pub attention_mask: Tensor,
}

impl TextTokens {
    /// Returns the number of texts in the batch.
    pub fn len(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pretrained model that maps audio and text into one joint embedding space.
///
/// Both methods return one `joint_embed_dim()`-dimensional vector per input
/// item, stacked as `[N, D]`. Implementations run in inference mode; callers
/// only hold shared references, so the model is never updated.
pub trait JointEmbedder {
    /// Returns the dimensionality of the joint embedding space (e.g., 512).
    fn joint_embed_dim(&self) -> usize;

    /// Embeds a batch of audio clips.
    fn get_audio_embedding(&self, audio: &[AudioFeatures]) -> Result<Tensor, ClapError>;

    /// Embeds a batch of tokenized texts.
    fn get_text_embedding(&self, text: &TextTokens) -> Result<Tensor, ClapError>;
}
