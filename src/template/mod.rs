//! Chat templates: turning a conversation into a single prompt string

mod builtin;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::{Args, TemplateConfig};
use crate::error::{BenchError, Result};
use crate::types::Message;

pub use builtin::BuiltinTemplate;

/// Options recognised when rendering a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Append the marker that opens the assistant's turn
    pub add_generation_prompt: bool,
}

impl RenderOptions {
    /// Read rendering options from a template's `args` map.
    ///
    /// Prompts are always kept as text; `tokenize: true` is rejected because
    /// tokenization is a separate pass over the whole dataset.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut options = RenderOptions {
            add_generation_prompt: false,
        };

        for (key, value) in args {
            match (key.as_str(), value) {
                ("add_generation_prompt", Value::Bool(flag)) => options.add_generation_prompt = *flag,
                ("tokenize", Value::Bool(false)) => {}
                ("tokenize", Value::Bool(true)) => {
                    return Err(BenchError::TemplateError {
                        message: "tokenize must be false; prompts are tokenized in a separate pass".to_string(),
                    });
                }
                ("add_generation_prompt", _) | ("tokenize", _) => {
                    return Err(BenchError::TemplateError {
                        message: format!("template option '{}' must be a boolean", key),
                    });
                }
                _ => debug!(option = %key, "ignoring unsupported template option"),
            }
        }

        Ok(options)
    }
}

/// Maps a structured conversation to a prompt string
pub trait ChatTemplate: Send + Sync {
    fn name(&self) -> &str;

    fn render(&self, messages: &[Message], options: &RenderOptions) -> Result<String>;
}

/// Named chat templates available to configurations
#[derive(Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Arc<dyn ChatTemplate>>,
}

impl TemplateRegistry {
    pub fn empty() -> Self {
        Self {
            templates: BTreeMap::new(),
        }
    }

    /// Registry holding every [`BuiltinTemplate`]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for template in BuiltinTemplate::ALL {
            registry.register(Arc::new(template));
        }
        registry
    }

    pub fn register(&mut self, template: Arc<dyn ChatTemplate>) {
        self.templates.insert(template.name().to_string(), template);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChatTemplate>> {
        self.templates.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Pick the template a model renders prompts with.
///
/// A named template wins when `force` is set or the tokenizer ships no chat
/// template of its own; otherwise the tokenizer's template is used.
pub fn resolve_template(
    config: &TemplateConfig,
    tokenizer_template: Option<&str>,
    registry: &TemplateRegistry,
) -> Result<Arc<dyn ChatTemplate>> {
    let named = match &config.name {
        Some(name) => Some(
            registry
                .get(name)
                .ok_or_else(|| BenchError::UnknownTemplate { name: name.clone() })?,
        ),
        None => None,
    };

    match (named, tokenizer_template) {
        (Some(named), None) => Ok(named),
        (Some(named), Some(_)) if config.force => Ok(named),
        (named, Some(source)) => {
            let builtin = BuiltinTemplate::detect(source).ok_or_else(|| BenchError::TemplateError {
                message: "tokenizer chat template is not a recognised format".to_string(),
            })?;
            if let Some(named) = named {
                info!(
                    requested = named.name(),
                    using = builtin.id(),
                    "tokenizer ships a chat template; set template.force to override it"
                );
            }
            Ok(Arc::new(builtin))
        }
        (None, None) => Err(BenchError::TemplateError {
            message: "no template configured and the tokenizer has no chat template".to_string(),
        }),
    }
}
