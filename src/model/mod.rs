//! Model backend: tokenizers, generators and the loaders that build them

mod generation;
mod loader;
mod runtime;
mod tokenizer;

use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{Device, Tensor};

use crate::config::{ModelConfig, TokenizerConfig};
use crate::error::{BenchError, Result};
use crate::processing::{PaddingSide, TokenSequence};

pub use generation::{GenerateRequest, GenerationParams};
pub use loader::{parse_dtype, CandleBackend, LoraAdapter, ModelLoader};
pub use runtime::CandleGenerator;
pub use tokenizer::{HfTokenizer, TokenizerMetadata};

/// Model classes the candle loader can build
pub(crate) const SUPPORTED_MODEL_CLASSES: &[&str] = &["AutoModelForCausalLM", "LlamaForCausalLM"];

pub(crate) const SUPPORTED_TOKENIZER_CLASSES: &[&str] = &["AutoTokenizer", "PreTrainedTokenizerFast"];

pub(crate) const SUPPORTED_PEFT_CLASSES: &[&str] = &["PeftModel"];

/// Tokenizer operations the dataset builder and inference runner rely on
pub trait TextTokenizer: Send + Sync {
    /// Encode each text without padding
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<u32>>>;

    fn decode_batch(&self, sequences: &[Vec<u32>], skip_special_tokens: bool) -> Result<Vec<String>>;

    fn eos_token_id(&self) -> Option<u32>;

    fn pad_token_id(&self) -> Option<u32>;

    fn padding_side(&self) -> PaddingSide {
        PaddingSide::Right
    }

    /// Raw chat template shipped with the tokenizer, if any
    fn chat_template(&self) -> Option<&str> {
        None
    }

    /// Configured padded length; `None` pads to the longest prompt
    fn max_length(&self) -> Option<usize> {
        None
    }

    /// Encode and pad every text to `max_length`, or to the longest text when unset.
    ///
    /// Never truncates: a text longer than `max_length` is an error.
    fn encode_padded(&self, texts: &[String], max_length: Option<usize>) -> Result<Vec<TokenSequence>> {
        let mut sequences: Vec<TokenSequence> = self.encode_batch(texts)?.into_iter().map(TokenSequence::new).collect();

        let longest = sequences.iter().map(|s| s.length).max().unwrap_or(0);
        let target = max_length.unwrap_or(longest);
        if let Some((index, sequence)) = sequences.iter().enumerate().find(|(_, s)| s.length > target) {
            return Err(BenchError::tokenizer(format!(
                "prompt {} is {} tokens long, exceeding max_length {}",
                index, sequence.length, target
            )));
        }

        if sequences.iter().any(|s| s.length < target) {
            let pad_token_id = self.pad_token_id().ok_or_else(|| {
                BenchError::tokenizer("tokenizer has no pad token; set patch_tokenizer_pad to pad with eos")
            })?;
            let side = self.padding_side();
            for sequence in &mut sequences {
                sequence.pad_to_length(target, pad_token_id, side);
            }
        }

        Ok(sequences)
    }
}

/// Produces continuations for a padded batch of prompts
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns `(batch, input_len + new_len)` token IDs: each input row followed by
    /// its continuation, right-padded with `request.pad_token_id`
    async fn generate(&self, input_ids: &Tensor, attention_mask: &Tensor, request: &GenerateRequest) -> Result<Tensor>;

    /// Device input tensors must live on
    fn device(&self) -> &Device;
}

/// Loads the tokenizer and generator a model configuration names
#[async_trait]
pub trait Backend: Send + Sync {
    fn load_tokenizer(&self, config: &TokenizerConfig) -> Result<Arc<dyn TextTokenizer>>;

    async fn load_generator(&self, config: &ModelConfig) -> Result<Arc<dyn Generator>>;
}
