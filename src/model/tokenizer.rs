// Location: src/model/tokenizer.rs

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokenizers::Tokenizer;
use tracing::debug;

use crate::config::TokenizerConfig;
use crate::error::{BenchError, Result};
use crate::processing::PaddingSide;

use super::{TextTokenizer, SUPPORTED_TOKENIZER_CLASSES};

/// Special tokens as written in `tokenizer_config.json`: either plain strings or added-token objects
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TokenSpec {
    Content(String),
    AddedToken { content: String },
}

impl TokenSpec {
    fn content(&self) -> &str {
        match self {
            TokenSpec::Content(content) => content,
            TokenSpec::AddedToken { content } => content,
        }
    }
}

/// Fields of `tokenizer_config.json` the runner uses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenizerMetadata {
    #[serde(default)]
    pub eos_token: Option<TokenSpec>,
    #[serde(default)]
    pub pad_token: Option<TokenSpec>,
    #[serde(default)]
    pub padding_side: Option<PaddingSide>,
    /// A single template string, or a list of named templates
    #[serde(default)]
    pub chat_template: Option<Value>,
}

impl TokenizerMetadata {
    fn default_chat_template(&self) -> Option<String> {
        match self.chat_template.as_ref()? {
            Value::String(template) => Some(template.clone()),
            Value::Array(named) => named
                .iter()
                .find(|entry| entry.get("name").and_then(Value::as_str) == Some("default"))
                .or_else(|| named.first())
                .and_then(|entry| entry.get("template"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenizerArgs {
    #[serde(default)]
    add_special_tokens: Option<bool>,
    #[serde(default)]
    padding_side: Option<PaddingSide>,
    #[serde(default)]
    max_length: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    eos_token_id: Option<u32>,
    pad_token_id: Option<u32>,
}

/// HuggingFace `tokenizers` tokenizer with the settings of its `tokenizer_config.json`
pub struct HfTokenizer {
    tokenizer: Arc<Tokenizer>,
    special_tokens: SpecialTokens,
    padding_side: PaddingSide,
    add_special_tokens: bool,
    max_length: Option<usize>,
    chat_template: Option<String>,
}

impl HfTokenizer {
    /// Load `tokenizer.json` and, when present, `tokenizer_config.json` from `config.name`
    pub fn from_dir(config: &TokenizerConfig) -> Result<Self> {
        let dir = Path::new(&config.name);
        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json")).map_err(|e| BenchError::TokenizerError {
            message: format!("Failed to load tokenizer from {}", dir.display()),
            source: Some(e),
        })?;

        let metadata_path = dir.join("tokenizer_config.json");
        let metadata = if metadata_path.exists() {
            serde_json::from_slice(&std::fs::read(&metadata_path)?).map_err(|e| BenchError::TokenizerError {
                message: format!("Malformed {}", metadata_path.display()),
                source: Some(Box::new(e)),
            })?
        } else {
            debug!("No tokenizer_config.json in {}", dir.display());
            TokenizerMetadata::default()
        };

        Self::from_parts(tokenizer, metadata, config)
    }

    /// Combine a loaded tokenizer with its metadata and the configured overrides
    pub fn from_parts(mut tokenizer: Tokenizer, metadata: TokenizerMetadata, config: &TokenizerConfig) -> Result<Self> {
        if !SUPPORTED_TOKENIZER_CLASSES.contains(&config.class_name.as_str()) {
            return Err(BenchError::tokenizer(format!(
                "unsupported tokenizer class '{}'",
                config.class_name
            )));
        }

        // Padding and the length limit belong to `encode_padded`
        tokenizer.with_padding(None);
        tokenizer.with_truncation(None).map_err(|e| BenchError::TokenizerError {
            message: "Failed to disable truncation".to_string(),
            source: Some(e),
        })?;

        let args: TokenizerArgs = serde_json::from_value(Value::Object(config.args.clone()))
            .map_err(|e| BenchError::config("tokenizer.args", e.to_string()))?;

        let token_id = |spec: &Option<TokenSpec>| -> Result<Option<u32>> {
            match spec {
                Some(spec) => tokenizer
                    .token_to_id(spec.content())
                    .map(Some)
                    .ok_or_else(|| BenchError::tokenizer(format!("token '{}' is not in the vocabulary", spec.content()))),
                None => Ok(None),
            }
        };

        let eos_token_id = token_id(&metadata.eos_token)?;
        let mut pad_token_id = token_id(&metadata.pad_token)?;
        if config.patch_tokenizer_pad {
            pad_token_id = Some(eos_token_id.ok_or_else(|| {
                BenchError::tokenizer("patch_tokenizer_pad requires the tokenizer to define an eos token")
            })?);
        }

        Ok(Self {
            chat_template: metadata.default_chat_template(),
            tokenizer: Arc::new(tokenizer),
            special_tokens: SpecialTokens {
                eos_token_id,
                pad_token_id,
            },
            padding_side: args.padding_side.or(metadata.padding_side).unwrap_or_default(),
            add_special_tokens: args.add_special_tokens.unwrap_or(true),
            max_length: args.max_length,
        })
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<u32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), self.add_special_tokens)
            .map_err(|e| BenchError::TokenizerError {
                message: "Batch tokenization failed".to_string(),
                source: Some(e),
            })?;

        Ok(encodings.iter().map(|encoding| encoding.get_ids().to_vec()).collect())
    }

    fn decode_batch(&self, sequences: &[Vec<u32>], skip_special_tokens: bool) -> Result<Vec<String>> {
        let sequences: Vec<&[u32]> = sequences.iter().map(Vec::as_slice).collect();
        self.tokenizer
            .decode_batch(&sequences, skip_special_tokens)
            .map_err(|e| BenchError::TokenizerError {
                message: "Batch decoding failed".to_string(),
                source: Some(e),
            })
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.special_tokens.eos_token_id
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.special_tokens.pad_token_id
    }

    fn padding_side(&self) -> PaddingSide {
        self.padding_side
    }

    fn chat_template(&self) -> Option<&str> {
        self.chat_template.as_deref()
    }

    fn max_length(&self) -> Option<usize> {
        self.max_length
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::str::FromStr;
    use tokenizers::{PaddingParams, PaddingStrategy, TruncationParams};

    /// Word-level tokenizer over a tiny vocabulary
    pub(crate) fn word_tokenizer() -> Tokenizer {
        let spec = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0, "content": "<pad>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 1, "content": "</s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": {"<pad>": 0, "</s>": 1, "<unk>": 2, "hello": 3, "world": 4, "paris": 5, "is": 6, "the": 7, "answer": 8},
                "unk_token": "<unk>"
            }
        });
        Tokenizer::from_str(&spec.to_string()).unwrap()
    }

    fn config(patch: bool, args: Value) -> TokenizerConfig {
        TokenizerConfig {
            name: "tok".into(),
            class_name: "AutoTokenizer".into(),
            patch_tokenizer_pad: patch,
            args: args.as_object().cloned().unwrap(),
        }
    }

    fn metadata(pad: Option<&str>) -> TokenizerMetadata {
        TokenizerMetadata {
            eos_token: Some(TokenSpec::Content("</s>".into())),
            pad_token: pad.map(|p| TokenSpec::AddedToken { content: p.into() }),
            padding_side: Some(PaddingSide::Left),
            chat_template: Some(json!("{% for m in messages %}<|im_start|>{{ m.role }}{% endfor %}")),
        }
    }

    #[test]
    fn test_special_tokens_and_settings() {
        let tokenizer = HfTokenizer::from_parts(word_tokenizer(), metadata(Some("<pad>")), &config(false, json!({}))).unwrap();
        assert_eq!(tokenizer.eos_token_id(), Some(1));
        assert_eq!(tokenizer.pad_token_id(), Some(0));
        assert_eq!(tokenizer.padding_side(), PaddingSide::Left);
        assert!(tokenizer.chat_template().unwrap().contains("<|im_start|>"));
        assert_eq!(tokenizer.max_length(), None);
    }

    #[test]
    fn test_patch_pad_uses_eos() {
        let tokenizer = HfTokenizer::from_parts(word_tokenizer(), metadata(None), &config(false, json!({}))).unwrap();
        assert_eq!(tokenizer.pad_token_id(), None);

        let patched = HfTokenizer::from_parts(
            word_tokenizer(),
            metadata(None),
            &config(true, json!({"padding_side": "right", "max_length": 6})),
        )
        .unwrap();
        assert_eq!(patched.pad_token_id(), Some(1));
        assert_eq!(patched.padding_side(), PaddingSide::Right);
        assert_eq!(patched.max_length(), Some(6));
    }

    #[test]
    fn test_patch_pad_overrides_declared_pad() {
        let tokenizer = HfTokenizer::from_parts(word_tokenizer(), metadata(Some("<pad>")), &config(true, json!({}))).unwrap();
        assert_eq!(tokenizer.pad_token_id(), Some(1));
    }

    #[test]
    fn test_file_truncation_is_ignored() {
        let mut inner = word_tokenizer();
        inner
            .with_truncation(Some(TruncationParams {
                max_length: 2,
                ..Default::default()
            }))
            .unwrap();
        let tokenizer = HfTokenizer::from_parts(inner, metadata(Some("<pad>")), &config(false, json!({}))).unwrap();

        let sequences = tokenizer.encode_padded(&["paris is the answer".to_string()], None).unwrap();
        assert_eq!(sequences[0].token_ids, vec![5, 6, 7, 8]);

        let err = tokenizer
            .encode_padded(&["paris is the answer".to_string()], Some(3))
            .unwrap_err();
        assert!(matches!(err, BenchError::TokenizerError { .. }));
    }

    #[test]
    fn test_file_padding_is_ignored() {
        let mut inner = word_tokenizer();
        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(4),
            pad_id: 0,
            pad_token: "<pad>".to_string(),
            ..Default::default()
        }));
        let tokenizer = HfTokenizer::from_parts(inner, metadata(Some("<pad>")), &config(false, json!({}))).unwrap();

        assert_eq!(tokenizer.encode_batch(&["hello".to_string()]).unwrap(), vec![vec![3]]);

        let sequences = tokenizer
            .encode_padded(&["hello".to_string(), "hello world".to_string()], None)
            .unwrap();
        assert_eq!(sequences[0].token_ids, vec![0, 3]);
        assert_eq!(sequences[0].attention_mask, vec![0, 1]);
        assert_eq!(sequences[1].attention_mask, vec![1, 1]);
    }

    #[test]
    fn test_encode_pad_and_decode() {
        let tokenizer = HfTokenizer::from_parts(word_tokenizer(), metadata(Some("<pad>")), &config(false, json!({}))).unwrap();
        let sequences = tokenizer
            .encode_padded(&["hello world".to_string(), "paris".to_string()], None)
            .unwrap();
        assert_eq!(sequences[0].token_ids, vec![3, 4]);
        assert_eq!(sequences[1].token_ids, vec![0, 5]);
        assert_eq!(sequences[1].attention_mask, vec![0, 1]);

        let decoded = tokenizer.decode_batch(&[vec![5, 6, 7, 8, 1, 0]], true).unwrap();
        assert_eq!(decoded, vec!["paris is the answer".to_string()]);
    }

    #[test]
    fn test_named_chat_templates() {
        let metadata = TokenizerMetadata {
            chat_template: Some(json!([
                {"name": "tool_use", "template": "tools"},
                {"name": "default", "template": "[INST]"}
            ])),
            ..Default::default()
        };
        assert_eq!(metadata.default_chat_template().as_deref(), Some("[INST]"));
    }

    #[test]
    fn test_rejects_unknown_class_and_tokens() {
        let mut bad_class = config(false, json!({}));
        bad_class.class_name = "SentencePieceTokenizer".into();
        assert!(HfTokenizer::from_parts(word_tokenizer(), metadata(None), &bad_class).is_err());

        let missing = TokenizerMetadata {
            eos_token: Some(TokenSpec::Content("<eos>".into())),
            ..Default::default()
        };
        assert!(HfTokenizer::from_parts(word_tokenizer(), missing, &config(false, json!({}))).is_err());
    }

    #[test]
    fn test_from_dir_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        word_tokenizer().save(dir.path().join("tokenizer.json"), false).unwrap();
        std::fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"eos_token": {"content": "</s>", "special": true}, "pad_token": null, "model_max_length": 512}"#,
        )
        .unwrap();

        let mut config = config(true, json!({}));
        config.name = dir.path().to_string_lossy().into_owned();
        let tokenizer = HfTokenizer::from_dir(&config).unwrap();
        assert_eq!(tokenizer.eos_token_id(), Some(1));
        assert_eq!(tokenizer.pad_token_id(), Some(1));
        assert!(tokenizer.chat_template().is_none());
    }
}
