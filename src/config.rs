// Location: src/config.rs

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{BenchError, Result};

/// Open key/value map forwarded to task, model, tokenizer or generation construction
pub type Args = Map<String, Value>;

/// Names a configuration may reference.
///
/// Injected into [`parse_config`] so validation does not depend on any global
/// registry.
pub trait NameLookup {
    /// Identifiers of every available task
    fn task_names(&self) -> BTreeSet<String>;

    /// Identifiers of every available chat template
    fn template_names(&self) -> BTreeSet<String>;
}

/// A validated experiment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub experiment: String,
    pub tasks: Vec<TaskConfig>,
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Registered task identifier
    pub name: String,

    /// Number of few-shot exemplars placed before each question
    #[serde(default = "default_num_shots")]
    pub num_shots: usize,

    /// Task construction arguments (data path, limits, overrides)
    #[serde(default)]
    pub args: Args,
}

/// Model, tokenizer, template, generation and adapter settings for one model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    pub model: ModelSpec,
    pub tokenizer: TokenizerConfig,
    pub template: TemplateConfig,
    pub generate: GenerateConfig,
    pub peft: Option<PeftConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    /// Model identifier; resolved as a local directory by the backend
    pub name: String,

    #[serde(rename = "class", alias = "class_name", default = "default_model_class")]
    pub class_name: String,

    #[serde(default = "default_dtype")]
    pub dtype: String,

    #[serde(default)]
    pub args: Args,
}

/// Tokenizer settings after normalization; `name` is always populated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenizerConfig {
    pub name: String,
    pub class_name: String,
    pub patch_tokenizer_pad: bool,
    pub args: Args,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStyle {
    /// Merge the system instruction into the first user turn
    #[default]
    Inject,
    /// Emit the system instruction as its own leading turn
    System,
    /// Drop the system instruction
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    #[serde(default)]
    pub system_style: SystemStyle,

    /// Named template, or `None` to use the tokenizer's built-in chat template
    #[serde(default)]
    pub name: Option<String>,

    /// Prefer the named template even when the tokenizer ships its own
    #[serde(default)]
    pub force: bool,

    /// Rendering options
    #[serde(default = "default_template_args")]
    pub args: Args,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Generation parameters
    #[serde(default = "default_generate_args")]
    pub args: Args,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeftConfig {
    pub name: String,

    #[serde(rename = "class", alias = "class_name", default = "default_peft_class")]
    pub class_name: String,

    #[serde(default)]
    pub args: Args,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            system_style: SystemStyle::default(),
            name: None,
            force: false,
            args: default_template_args(),
        }
    }
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            args: default_generate_args(),
        }
    }
}

impl ModelConfig {
    /// Short label used in logs and output file names
    pub fn label(&self) -> String {
        match &self.peft {
            Some(peft) => format!("{}+{}", self.model.name, peft.name),
            None => self.model.name.clone(),
        }
    }
}

// Raw document shapes. They only exist between deserialization and validation.

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    experiment: String,
    tasks: Vec<TaskConfig>,
    models: Vec<RawModelConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModelConfig {
    model: ModelSpec,
    #[serde(default)]
    tokenizer: RawTokenizerConfig,
    #[serde(default)]
    template: TemplateConfig,
    #[serde(default)]
    generate: GenerateConfig,
    #[serde(default)]
    peft: Option<PeftConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTokenizerConfig {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "class", alias = "class_name", default = "default_tokenizer_class")]
    class_name: String,
    #[serde(default)]
    patch_tokenizer_pad: bool,
    #[serde(default)]
    args: Args,
}

impl Default for RawTokenizerConfig {
    fn default() -> Self {
        Self {
            name: None,
            class_name: default_tokenizer_class(),
            patch_tokenizer_pad: false,
            args: Args::new(),
        }
    }
}

fn default_num_shots() -> usize {
    3
}

fn default_model_class() -> String {
    "AutoModelForCausalLM".to_string()
}

fn default_tokenizer_class() -> String {
    "AutoTokenizer".to_string()
}

fn default_peft_class() -> String {
    "PeftModel".to_string()
}

fn default_dtype() -> String {
    "float32".to_string()
}

fn default_batch_size() -> usize {
    16
}

fn default_template_args() -> Args {
    let mut args = Args::new();
    args.insert("add_generation_prompt".to_string(), json!(true));
    args.insert("tokenize".to_string(), json!(false));
    args
}

fn default_generate_args() -> Args {
    let mut args = Args::new();
    args.insert("do_sample".to_string(), json!(false));
    args
}

/// Parse and validate a configuration document.
///
/// Rejects the whole document on the first schema or reference violation.
pub fn parse_config(document: &str, lookup: &dyn NameLookup) -> Result<Config> {
    let raw: RawConfig = serde_yaml::from_str(document)?;
    validate(raw, lookup)
}

/// Read a configuration file and validate it
pub fn load_config(path: impl AsRef<Path>, lookup: &dyn NameLookup) -> Result<Config> {
    let path = path.as_ref();
    let document = std::fs::read_to_string(path).map_err(|e| {
        BenchError::config("config", format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_config(&document, lookup)
}

fn validate(raw: RawConfig, lookup: &dyn NameLookup) -> Result<Config> {
    let task_names = lookup.task_names();
    for task in &raw.tasks {
        if !task_names.contains(&task.name) {
            return Err(BenchError::UnknownTask {
                name: task.name.clone(),
            });
        }
    }

    let template_names = lookup.template_names();
    let mut models = Vec::with_capacity(raw.models.len());
    for model in raw.models {
        if let Some(name) = &model.template.name {
            if !template_names.contains(name) {
                return Err(BenchError::UnknownTemplate { name: name.clone() });
            }
        }

        if model.generate.batch_size == 0 {
            return Err(BenchError::config(
                "generate.batch_size",
                format!("must be positive for model {}", model.model.name),
            ));
        }

        let tokenizer = TokenizerConfig {
            name: model
                .tokenizer
                .name
                .unwrap_or_else(|| model.model.name.clone()),
            class_name: model.tokenizer.class_name,
            patch_tokenizer_pad: model.tokenizer.patch_tokenizer_pad,
            args: model.tokenizer.args,
        };

        models.push(ModelConfig {
            model: model.model,
            tokenizer,
            template: model.template,
            generate: model.generate,
            peft: model.peft,
        });
    }

    Ok(Config {
        experiment: raw.experiment,
        tasks: raw.tasks,
        models,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    pub(crate) struct StaticLookup {
        pub tasks: Vec<&'static str>,
        pub templates: Vec<&'static str>,
    }

    impl NameLookup for StaticLookup {
        fn task_names(&self) -> BTreeSet<String> {
            self.tasks.iter().map(|s| s.to_string()).collect()
        }

        fn template_names(&self) -> BTreeSet<String> {
            self.templates.iter().map(|s| s.to_string()).collect()
        }
    }

    pub(crate) fn lookup() -> StaticLookup {
        StaticLookup {
            tasks: vec!["squad_v2", "qa"],
            templates: vec!["chatml", "llama2"],
        }
    }

    const MINIMAL: &str = r#"
experiment: smoke
tasks:
  - name: squad_v2
    num_shots: 0
models:
  - model:
      name: models/tiny-llama
"#;

    #[test]
    fn test_defaults() {
        let config = parse_config(MINIMAL, &lookup()).unwrap();
        assert_eq!(config.experiment, "smoke");
        assert_eq!(config.tasks[0].num_shots, 0);

        let model = &config.models[0];
        assert_eq!(model.model.class_name, "AutoModelForCausalLM");
        assert_eq!(model.model.dtype, "float32");
        assert_eq!(model.tokenizer.class_name, "AutoTokenizer");
        assert!(!model.tokenizer.patch_tokenizer_pad);
        assert_eq!(model.template.system_style, SystemStyle::Inject);
        assert_eq!(model.template.name, None);
        assert_eq!(model.template.args, default_template_args());
        assert_eq!(model.generate.batch_size, 16);
        assert_eq!(model.generate.args.get("do_sample"), Some(&json!(false)));
        assert!(model.peft.is_none());
    }

    #[test]
    fn test_default_num_shots() {
        let doc = MINIMAL.replace("    num_shots: 0\n", "");
        let config = parse_config(&doc, &lookup()).unwrap();
        assert_eq!(config.tasks[0].num_shots, 3);
    }

    #[test]
    fn test_tokenizer_name_defaults_to_model_name() {
        let config = parse_config(MINIMAL, &lookup()).unwrap();
        assert_eq!(config.models[0].tokenizer.name, "models/tiny-llama");
    }

    #[test]
    fn test_explicit_tokenizer_name_is_kept() {
        let doc = r#"
experiment: e
tasks: []
models:
  - model: {name: base}
    tokenizer: {name: other, class: PreTrainedTokenizerFast, patch_tokenizer_pad: true}
"#;
        let config = parse_config(doc, &lookup()).unwrap();
        let tokenizer = &config.models[0].tokenizer;
        assert_eq!(tokenizer.name, "other");
        assert_eq!(tokenizer.class_name, "PreTrainedTokenizerFast");
        assert!(tokenizer.patch_tokenizer_pad);
    }

    #[test]
    fn test_unknown_task_is_rejected() {
        let doc = MINIMAL.replace("squad_v2", "trivia_qa");
        match parse_config(&doc, &lookup()) {
            Err(BenchError::UnknownTask { name }) => assert_eq!(name, "trivia_qa"),
            other => panic!("expected unknown task, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_template_is_rejected() {
        let doc = format!("{}    template:\n      name: vicuna\n", MINIMAL);
        match parse_config(&doc, &lookup()) {
            Err(BenchError::UnknownTemplate { name }) => assert_eq!(name, "vicuna"),
            other => panic!("expected unknown template, got {:?}", other),
        }
    }

    #[test]
    fn test_known_template_and_full_model() {
        let doc = r#"
experiment: full
tasks:
  - name: qa
    args: {path: data/qa.jsonl, limit: 10}
models:
  - model: {name: m, class: LlamaForCausalLM, dtype: bfloat16}
    template: {name: chatml, system_style: system, force: true}
    generate: {batch_size: 4, args: {do_sample: true, temperature: 0.7}}
    peft: {name: adapters/lora}
"#;
        let config = parse_config(doc, &lookup()).unwrap();
        let model = &config.models[0];
        assert_eq!(model.model.class_name, "LlamaForCausalLM");
        assert_eq!(model.template.name.as_deref(), Some("chatml"));
        assert_eq!(model.template.system_style, SystemStyle::System);
        assert!(model.template.force);
        assert_eq!(model.generate.batch_size, 4);
        let peft = model.peft.as_ref().unwrap();
        assert_eq!(peft.class_name, "PeftModel");
        assert_eq!(model.label(), "m+adapters/lora");
        assert_eq!(config.tasks[0].args.get("limit"), Some(&json!(10)));
    }

    #[test]
    fn test_missing_required_fields() {
        let missing_task_name = r#"
experiment: e
tasks:
  - num_shots: 1
models: []
"#;
        assert!(matches!(
            parse_config(missing_task_name, &lookup()),
            Err(BenchError::Yaml(_))
        ));

        let missing_model_name = r#"
experiment: e
tasks: []
models:
  - model: {dtype: float32}
"#;
        assert!(matches!(
            parse_config(missing_model_name, &lookup()),
            Err(BenchError::Yaml(_))
        ));
    }

    #[test]
    fn test_invalid_system_style_and_batch_size() {
        let doc = format!("{}    template:\n      system_style: sideways\n", MINIMAL);
        assert!(matches!(parse_config(&doc, &lookup()), Err(BenchError::Yaml(_))));

        let doc = format!("{}    generate:\n      batch_size: 0\n", MINIMAL);
        let err = parse_config(&doc, &lookup()).unwrap_err();
        assert!(matches!(err, BenchError::ConfigurationError { .. }));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = load_config(file.path(), &lookup()).unwrap();
        assert_eq!(config.tasks.len(), 1);

        let missing = load_config("/nonexistent/config.yaml", &lookup());
        assert!(matches!(missing, Err(BenchError::ConfigurationError { .. })));
    }
}
