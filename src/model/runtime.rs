// Location: src/model/runtime.rs

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaEosToks};
use tracing::debug;

use crate::error::{BenchError, Result};
use crate::processing::strip_padding;

use super::{GenerateRequest, Generator};

/// Llama-family generator running on a candle device
pub struct CandleGenerator {
    model: Llama,
    config: Config,
    dtype: DType,
    device: Device,
}

impl CandleGenerator {
    pub fn new(model: Llama, config: Config, dtype: DType, device: Device) -> Self {
        Self {
            model,
            config,
            dtype,
            device,
        }
    }

    fn is_eos(&self, token: u32, request: &GenerateRequest) -> bool {
        if request.eos_token_id == Some(token) {
            return true;
        }
        match &self.config.eos_token_id {
            Some(LlamaEosToks::Single(eos)) => *eos == token,
            Some(LlamaEosToks::Multiple(eos)) => eos.contains(&token),
            None => false,
        }
    }

    /// Decode up to `max_new_tokens` after `prompt` with a fresh KV cache
    async fn generate_row(&self, prompt: &[u32], request: &GenerateRequest) -> Result<Vec<u32>> {
        if prompt.is_empty() {
            return Err(BenchError::model("cannot generate from an empty prompt"));
        }

        let params = &request.params;
        let mut cache = Cache::new(true, self.dtype, &self.config, &self.device)?;
        let mut logits_processor = LogitsProcessor::from_sampling(params.seed, params.sampling());

        let mut tokens = prompt.to_vec();
        let mut generated = Vec::with_capacity(request.max_new_tokens);
        let mut index_pos = 0;

        for step in 0..request.max_new_tokens {
            let context = if step == 0 { &tokens[..] } else { &tokens[tokens.len() - 1..] };
            let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input, index_pos, &mut cache)?;
            index_pos += context.len();

            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            let logits = match params.active_repetition_penalty() {
                Some(penalty) => {
                    let start_at = tokens.len().saturating_sub(params.repeat_last_n);
                    candle_transformers::utils::apply_repeat_penalty(&logits, penalty, &tokens[start_at..])?
                }
                None => logits,
            };

            let next_token = logits_processor.sample(&logits)?;
            tokens.push(next_token);
            generated.push(next_token);

            if self.is_eos(next_token, request) {
                break;
            }

            // Give timeouts and cancellation a chance to fire between decode steps
            tokio::task::yield_now().await;
        }

        Ok(generated)
    }
}

#[async_trait]
impl Generator for CandleGenerator {
    async fn generate(&self, input_ids: &Tensor, attention_mask: &Tensor, request: &GenerateRequest) -> Result<Tensor> {
        let (batch, width) = input_ids.dims2()?;
        let rows = input_ids.to_vec2::<u32>()?;
        let masks = attention_mask.to_vec2::<u32>()?;

        let mut continuations = Vec::with_capacity(batch);
        for (ids, mask) in rows.iter().zip(&masks) {
            let prompt = strip_padding(ids, mask);
            continuations.push(self.generate_row(&prompt, request).await?);
        }

        let new_tokens = continuations.iter().map(Vec::len).max().unwrap_or(0);
        debug!("Generated up to {} tokens for {} rows", new_tokens, batch);

        let mut output = Vec::with_capacity(batch * (width + new_tokens));
        for (ids, continuation) in rows.iter().zip(&continuations) {
            output.extend_from_slice(ids);
            output.extend_from_slice(continuation);
            output.extend(std::iter::repeat(request.pad_token_id).take(new_tokens - continuation.len()));
        }

        Ok(Tensor::from_vec(output, (batch, width + new_tokens), &self.device)?)
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GenerationParams;
    use candle_nn::VarBuilder;
    use candle_transformers::models::llama::LlamaConfig;

    fn tiny_config() -> Config {
        let config: LlamaConfig = serde_json::from_value(serde_json::json!({
            "hidden_size": 8,
            "intermediate_size": 16,
            "vocab_size": 12,
            "num_hidden_layers": 1,
            "num_attention_heads": 2,
            "num_key_value_heads": 2,
            "rms_norm_eps": 1e-5,
            "max_position_embeddings": 64,
            "eos_token_id": 11
        }))
        .unwrap();
        config.into_config(false)
    }

    fn tiny_generator() -> Result<CandleGenerator> {
        let device = Device::Cpu;
        let config = tiny_config();
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = Llama::load(vb, &config)?;
        Ok(CandleGenerator::new(model, config, DType::F32, device))
    }

    fn request(max_new_tokens: usize) -> GenerateRequest {
        GenerateRequest {
            max_new_tokens,
            pad_token_id: 11,
            eos_token_id: Some(11),
            params: GenerationParams::default(),
        }
    }

    #[tokio::test]
    async fn test_generate_appends_continuations() -> Result<()> {
        let generator = tiny_generator()?;
        let device = Device::Cpu;
        let input_ids = Tensor::new(&[[3u32, 4, 5], [11, 6, 7]], &device)?;
        let mask = Tensor::new(&[[1u32, 1, 1], [0, 1, 1]], &device)?;

        let output = generator.generate(&input_ids, &mask, &request(2)).await?;
        let (batch, width) = output.dims2()?;
        assert_eq!(batch, 2);
        assert!(width > 3 && width <= 5);

        let rows = output.to_vec2::<u32>()?;
        assert_eq!(&rows[0][..3], &[3, 4, 5]);
        assert_eq!(&rows[1][..3], &[11, 6, 7]);
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_rejects_empty_row() -> Result<()> {
        let generator = tiny_generator()?;
        let device = Device::Cpu;
        let input_ids = Tensor::new(&[[0u32, 0]], &device)?;
        let mask = Tensor::new(&[[0u32, 0]], &device)?;
        assert!(generator.generate(&input_ids, &mask, &request(2)).await.is_err());
        Ok(())
    }

    #[test]
    fn test_eos_detection() -> Result<()> {
        let generator = tiny_generator()?;
        let mut req = request(1);
        assert!(generator.is_eos(11, &req));
        req.eos_token_id = Some(2);
        assert!(generator.is_eos(2, &req));
        assert!(!generator.is_eos(3, &req));
        Ok(())
    }
}
