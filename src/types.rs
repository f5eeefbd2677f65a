//! Common type definitions used throughout the runner

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Ground-truth answer(s) for an example
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expected {
    Single(String),
    Many(Vec<String>),
}

impl Expected {
    /// First acceptable answer, if any
    pub fn first(&self) -> Option<&str> {
        match self {
            Expected::Single(answer) => Some(answer),
            Expected::Many(answers) => answers.first().map(String::as_str),
        }
    }
}

/// Identifiers extractive-QA scorers need to match predictions to source spans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanIds {
    pub id: String,
    pub answer_start: Vec<i64>,
}

/// An evaluation example produced by a task
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub messages: Vec<Message>,
    pub expected: Expected,
    /// Present only for tasks of kind [`crate::tasks::TaskKind::SpanExtraction`]
    pub span: Option<SpanIds>,
    /// Task-specific columns carried through the dataset unchanged
    pub extra: Map<String, Value>,
}

impl Example {
    pub fn new(messages: Vec<Message>, expected: Expected) -> Self {
        Self {
            messages,
            expected,
            span: None,
            extra: Map::new(),
        }
    }
}

/// Fields shared by every result record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRecord {
    pub messages: Vec<Message>,
    pub expected: Expected,
    /// Rendered prompt text
    pub input: String,
    /// Decoded continuation, whitespace-trimmed
    pub output: String,
}

/// A result record enriched with span identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    #[serde(flatten)]
    pub record: BaseRecord,
    pub id: String,
    pub answer_start: Vec<i64>,
}

/// Output of inference for one example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultRecord {
    WithSpan(SpanRecord),
    Base(BaseRecord),
}

impl ResultRecord {
    pub fn base(&self) -> &BaseRecord {
        match self {
            ResultRecord::WithSpan(span) => &span.record,
            ResultRecord::Base(base) => base,
        }
    }

    pub fn output(&self) -> &str {
        &self.base().output
    }

    /// Span identifiers, when the producing task declares them
    pub fn span(&self) -> Option<(&str, &[i64])> {
        match self {
            ResultRecord::WithSpan(span) => Some((&span.id, &span.answer_start)),
            ResultRecord::Base(_) => None,
        }
    }
}
