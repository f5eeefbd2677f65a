use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Llama, LlamaConfig};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::config::{ModelConfig, PeftConfig, TokenizerConfig};
use crate::error::{BenchError, Result};

use super::{
    Backend, CandleGenerator, Generator, HfTokenizer, TextTokenizer, SUPPORTED_MODEL_CLASSES, SUPPORTED_PEFT_CLASSES,
};

const LORA_A_SUFFIX: &str = ".lora_A.weight";
const LORA_B_SUFFIX: &str = ".lora_B.weight";
const PEFT_PREFIX: &str = "base_model.model.";

/// Map a configured dtype name onto a candle dtype
pub fn parse_dtype(name: &str) -> Result<DType> {
    match name {
        "float32" | "f32" => Ok(DType::F32),
        "float16" | "f16" | "half" => Ok(DType::F16),
        "bfloat16" | "bf16" => Ok(DType::BF16),
        other => Err(BenchError::config("model.dtype", format!("unsupported dtype '{}'", other))),
    }
}

/// Sorted `*.safetensors` files in a directory
fn weight_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |ext| ext == "safetensors"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(BenchError::model(format!("no .safetensors weights in {}", dir.display())));
    }
    Ok(files)
}

fn model_error(message: String) -> impl FnOnce(candle_core::Error) -> BenchError {
    move |e| BenchError::ModelError {
        message,
        source: Some(Box::new(e)),
    }
}

#[derive(Debug, Deserialize)]
struct AdapterConfig {
    r: usize,
    lora_alpha: f64,
}

/// LoRA adapter weights and scale
pub struct LoraAdapter {
    scale: f64,
    tensors: HashMap<String, Tensor>,
}

impl LoraAdapter {
    pub fn new(r: usize, lora_alpha: f64, tensors: HashMap<String, Tensor>) -> Result<Self> {
        if r == 0 {
            return Err(BenchError::config("peft.r", "LoRA rank must be positive"));
        }
        Ok(Self {
            scale: lora_alpha / r as f64,
            tensors,
        })
    }

    /// Read `adapter_config.json` and `adapter_model.safetensors` from `peft.name`
    pub fn load(config: &PeftConfig, device: &Device) -> Result<Self> {
        if !SUPPORTED_PEFT_CLASSES.contains(&config.class_name.as_str()) {
            return Err(BenchError::model(format!("unsupported peft class '{}'", config.class_name)));
        }

        let dir = Path::new(&config.name);
        let adapter: AdapterConfig = serde_json::from_slice(&std::fs::read(dir.join("adapter_config.json"))?)?;
        let weights = dir.join("adapter_model.safetensors");
        let tensors = candle_core::safetensors::load(&weights, device)
            .map_err(model_error(format!("Failed to read adapter {}", weights.display())))?;

        Self::new(adapter.r, adapter.lora_alpha, tensors)
    }

    /// Add `scale * B @ A` to every targeted base weight; returns how many were updated
    pub fn merge_into(&self, weights: &mut HashMap<String, Tensor>) -> Result<usize> {
        let mut merged = 0;
        for (key, lora_a) in &self.tensors {
            let Some(module) = key.strip_suffix(LORA_A_SUFFIX) else {
                continue;
            };

            let lora_b = self
                .tensors
                .get(&format!("{}{}", module, LORA_B_SUFFIX))
                .ok_or_else(|| BenchError::model(format!("adapter has {} without a matching lora_B", key)))?;

            let target = format!("{}.weight", module.strip_prefix(PEFT_PREFIX).unwrap_or(module));
            let base = weights
                .get(&target)
                .ok_or_else(|| BenchError::model(format!("adapter targets missing weight {}", target)))?;

            let delta = lora_b
                .to_dtype(DType::F32)?
                .matmul(&lora_a.to_dtype(DType::F32)?)?
                .affine(self.scale, 0.0)?;
            let updated = base.to_dtype(DType::F32)?.add(&delta)?.to_dtype(base.dtype())?;
            weights.insert(target, updated);
            merged += 1;
        }

        if merged == 0 {
            return Err(BenchError::model("adapter contains no LoRA weights"));
        }
        Ok(merged)
    }
}

/// Builds llama-family generators from local safetensors checkpoints
pub struct ModelLoader {
    device: Device,
}

impl ModelLoader {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn load(&self, config: &ModelConfig) -> Result<CandleGenerator> {
        let spec = &config.model;
        if !SUPPORTED_MODEL_CLASSES.contains(&spec.class_name.as_str()) {
            return Err(BenchError::model(format!("unsupported model class '{}'", spec.class_name)));
        }

        let dir = Path::new(&spec.name);
        let dtype = parse_dtype(&spec.dtype)?;
        let use_flash_attn = spec.args.get("use_flash_attn").and_then(Value::as_bool).unwrap_or(false);

        let llama_config: LlamaConfig = serde_json::from_slice(&std::fs::read(dir.join("config.json"))?)?;
        let llama_config = llama_config.into_config(use_flash_attn);

        let files = weight_files(dir)?;
        info!("Loading {} weight file(s) from {} as {:?}", files.len(), dir.display(), dtype);

        let vb = match &config.peft {
            Some(peft) => {
                let mut weights = HashMap::new();
                for file in &files {
                    let tensors = candle_core::safetensors::load(file, &self.device)
                        .map_err(model_error(format!("Failed to read {}", file.display())))?;
                    weights.extend(tensors);
                }
                let adapter = LoraAdapter::load(peft, &self.device)?;
                let merged = adapter.merge_into(&mut weights)?;
                info!("Merged {} LoRA module(s) from {}", merged, peft.name);
                VarBuilder::from_tensors(weights, dtype, &self.device)
            }
            None => unsafe {
                VarBuilder::from_mmaped_safetensors(&files, dtype, &self.device)
                    .map_err(model_error(format!("Failed to map weights in {}", dir.display())))?
            },
        };

        let model = Llama::load(vb, &llama_config)
            .map_err(model_error(format!("Failed to build model from {}", dir.display())))?;

        Ok(CandleGenerator::new(model, llama_config, dtype, self.device.clone()))
    }
}

/// Local-directory backend built on candle and `tokenizers`
pub struct CandleBackend {
    device: Device,
}

impl CandleBackend {
    pub fn new(device: Device) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Backend for CandleBackend {
    fn load_tokenizer(&self, config: &TokenizerConfig) -> Result<Arc<dyn TextTokenizer>> {
        Ok(Arc::new(HfTokenizer::from_dir(config)?))
    }

    async fn load_generator(&self, config: &ModelConfig) -> Result<Arc<dyn Generator>> {
        let loader = ModelLoader::new(self.device.clone());
        let config = config.clone();
        let generator = tokio::task::spawn_blocking(move || loader.load(&config))
            .await
            .map_err(|e| BenchError::ModelError {
                message: "Model loading task failed".to_string(),
                source: Some(Box::new(e)),
            })??;
        Ok(Arc::new(generator))
    }
}
