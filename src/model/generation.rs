use candle_transformers::generation::Sampling;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::Args;
use crate::error::{BenchError, Result};

pub(crate) const DEFAULT_SEED: u64 = 299792458;
pub(crate) const DEFAULT_REPEAT_LAST_N: usize = 64;

/// Decoding parameters taken from `generate.args`
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// `false` selects greedy decoding
    pub do_sample: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub repetition_penalty: Option<f32>,
    /// Window of recent tokens the repetition penalty looks at
    pub repeat_last_n: usize,
    pub seed: u64,
}

#[derive(Debug, Deserialize)]
struct RawParams {
    #[serde(default)]
    do_sample: bool,
    temperature: Option<f64>,
    top_p: Option<f64>,
    top_k: Option<usize>,
    repetition_penalty: Option<f32>,
    repeat_last_n: Option<usize>,
    seed: Option<u64>,
    #[serde(flatten)]
    unknown: Map<String, Value>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            do_sample: false,
            temperature: None,
            top_p: None,
            top_k: None,
            repetition_penalty: None,
            repeat_last_n: DEFAULT_REPEAT_LAST_N,
            seed: DEFAULT_SEED,
        }
    }
}

impl GenerationParams {
    pub fn from_args(args: &Args) -> Result<Self> {
        const PARAMETER: &str = "generate.args";

        let raw: RawParams = serde_json::from_value(Value::Object(args.clone()))
            .map_err(|e| BenchError::config(PARAMETER, e.to_string()))?;

        for key in raw.unknown.keys() {
            warn!("Ignoring unsupported generation parameter '{}'", key);
        }

        if raw.temperature.map_or(false, |t| t < 0.0) {
            return Err(BenchError::config(PARAMETER, "temperature must not be negative"));
        }
        if raw.top_p.map_or(false, |p| p <= 0.0 || p > 1.0) {
            return Err(BenchError::config(PARAMETER, "top_p must be in (0, 1]"));
        }
        if raw.top_k == Some(0) {
            return Err(BenchError::config(PARAMETER, "top_k must be positive"));
        }
        if raw.repetition_penalty.map_or(false, |p| p <= 0.0) {
            return Err(BenchError::config(PARAMETER, "repetition_penalty must be positive"));
        }

        Ok(Self {
            do_sample: raw.do_sample,
            temperature: raw.temperature,
            top_p: raw.top_p,
            top_k: raw.top_k,
            repetition_penalty: raw.repetition_penalty,
            repeat_last_n: raw.repeat_last_n.unwrap_or(DEFAULT_REPEAT_LAST_N),
            seed: raw.seed.unwrap_or(DEFAULT_SEED),
        })
    }

    /// Sampling strategy for the logits processor
    pub fn sampling(&self) -> Sampling {
        if !self.do_sample {
            return Sampling::ArgMax;
        }

        let temperature = self.temperature.unwrap_or(1.0);
        if temperature == 0.0 {
            return Sampling::ArgMax;
        }

        match (self.top_k, self.top_p) {
            (None, None) => Sampling::All { temperature },
            (Some(k), None) => Sampling::TopK { k, temperature },
            (None, Some(p)) => Sampling::TopP { p, temperature },
            (Some(k), Some(p)) => Sampling::TopKThenTopP { k, p, temperature },
        }
    }

    /// Penalty to apply, if it changes anything
    pub fn active_repetition_penalty(&self) -> Option<f32> {
        self.repetition_penalty.filter(|p| *p != 1.0)
    }
}

/// One generation call's settings
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub max_new_tokens: usize,
    /// Fills continuations shorter than the longest in the batch
    pub pad_token_id: u32,
    pub eos_token_id: Option<u32>,
    pub params: GenerationParams,
}
