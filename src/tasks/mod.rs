//! Benchmark tasks: datasets that produce evaluation conversations

mod jsonl;
mod prompt;

pub mod multiple_choice;
pub mod qa;
pub mod squad;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::config::{SystemStyle, TaskConfig};
use crate::error::{BenchError, Result};
use crate::types::Example;

#[cfg(test)]
pub(crate) use prompt::apply_system_style;

/// What a task's examples carry beyond messages and expected answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Free-form generation scored against expected answers
    Generative,
    /// Extractive QA; every example carries `id` and `answer_start`
    SpanExtraction,
}

impl TaskKind {
    pub fn emits_span_ids(&self) -> bool {
        matches!(self, TaskKind::SpanExtraction)
    }
}

/// A benchmark dataset that produces evaluation examples
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> TaskKind;

    /// Number of examples [`Task::build`] yields
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper bound on generated tokens per example
    fn max_new_tokens(&self) -> usize;

    /// Lazily produce every example with `num_shots` exemplars and the given system style
    fn build(&self, num_shots: usize, system_style: SystemStyle) -> Box<dyn Iterator<Item = Result<Example>> + '_>;
}

/// Arguments understood by the built-in JSONL tasks
#[derive(Debug, Clone, Deserialize)]
pub struct TaskOptions {
    /// JSONL file with one example per line
    pub path: PathBuf,
    /// JSONL file exemplars are drawn from; defaults to the dataset itself
    #[serde(default)]
    pub shots_path: Option<PathBuf>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub max_new_tokens: Option<usize>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl TaskOptions {
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            shots_path: None,
            limit: None,
            max_new_tokens: None,
            system_prompt: None,
        }
    }

    fn from_config(config: &TaskConfig) -> Result<Self> {
        serde_json::from_value(Value::Object(config.args.clone()))
            .map_err(|e| BenchError::config(format!("tasks.{}.args", config.name), e.to_string()))
    }
}

/// Constructs a task from its options
pub type TaskFactory = Arc<dyn Fn(&TaskOptions) -> Result<Box<dyn Task>> + Send + Sync>;

/// Available tasks, keyed by identifier
#[derive(Clone)]
pub struct TaskRegistry {
    factories: BTreeMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with `squad_v2`, `qa` and `multiple_choice`
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(squad::NAME, Arc::new(squad::load));
        registry.register(qa::NAME, Arc::new(qa::load));
        registry.register(multiple_choice::NAME, Arc::new(multiple_choice::load));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: TaskFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the task a configuration entry names
    pub fn create(&self, config: &TaskConfig) -> Result<Box<dyn Task>> {
        let factory = self.factories.get(&config.name).ok_or_else(|| BenchError::UnknownTask {
            name: config.name.clone(),
        })?;
        let options = TaskOptions::from_config(config)?;
        factory(&options)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
