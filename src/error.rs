use std::error::Error as StdError;
use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, BenchError>;

/// Errors raised while loading a configuration, building a dataset or running inference
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("Configuration error for {parameter}: {message}")]
    ConfigurationError {
        message: String,
        parameter: String,
    },

    #[error("Unknown task: {name}")]
    UnknownTask {
        name: String,
    },

    #[error("Unknown template: {name}")]
    UnknownTemplate {
        name: String,
    },

    #[error("Task {task} error: {message}")]
    TaskError {
        task: String,
        message: String,
    },

    #[error("Template error: {message}")]
    TemplateError {
        message: String,
    },

    #[error("Tokenizer error: {message}")]
    TokenizerError {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    #[error("Model error: {message}")]
    ModelError {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    #[error("Generation failed on batch {batch}: {message}")]
    GenerationError {
        batch: usize,
        message: String,
    },

    #[error("Operation '{operation}' timed out after {duration:?}")]
    TimeoutError {
        duration: Duration,
        operation: String,
    },

    #[error("Operation '{operation}' was cancelled")]
    Cancelled {
        operation: String,
    },

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed configuration document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Phase of a run an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Raised before any job starts; aborts the whole run
    Configuration,
    /// Raised while constructing a job's dataset or loading its model
    Build,
    /// Raised while generating or decoding a batch
    Inference,
}

impl BenchError {
    pub(crate) fn config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        BenchError::ConfigurationError {
            message: message.into(),
            parameter: parameter.into(),
        }
    }

    pub(crate) fn task(task: impl Into<String>, message: impl Into<String>) -> Self {
        BenchError::TaskError {
            task: task.into(),
            message: message.into(),
        }
    }

    pub(crate) fn tokenizer(message: impl Into<String>) -> Self {
        BenchError::TokenizerError {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn model(message: impl Into<String>) -> Self {
        BenchError::ModelError {
            message: message.into(),
            source: None,
        }
    }

    /// Classify the error by the phase that produced it
    pub fn stage(&self) -> Stage {
        match self {
            BenchError::ConfigurationError { .. }
            | BenchError::UnknownTask { .. }
            | BenchError::UnknownTemplate { .. }
            | BenchError::Yaml(_) => Stage::Configuration,
            BenchError::GenerationError { .. }
            | BenchError::TimeoutError { .. }
            | BenchError::Cancelled { .. }
            | BenchError::Tensor(_) => Stage::Inference,
            BenchError::TaskError { .. }
            | BenchError::TemplateError { .. }
            | BenchError::TokenizerError { .. }
            | BenchError::ModelError { .. }
            | BenchError::Io(_)
            | BenchError::Json(_) => Stage::Build,
        }
    }

    /// Whether a caller may skip the failing job and continue with the next one
    pub fn is_job_local(&self) -> bool {
        self.stage() != Stage::Configuration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = BenchError::UnknownTask {
            name: "trivia".to_string(),
        };
        assert_eq!(error.to_string(), "Unknown task: trivia");

        let error = BenchError::config("generate.batch_size", "must be positive");
        assert_eq!(
            error.to_string(),
            "Configuration error for generate.batch_size: must be positive"
        );
    }

    #[test]
    fn test_stage_classification() {
        assert_eq!(
            BenchError::UnknownTemplate { name: "x".into() }.stage(),
            Stage::Configuration
        );
        assert_eq!(BenchError::tokenizer("too long").stage(), Stage::Build);
        assert_eq!(
            BenchError::TimeoutError {
                duration: Duration::from_secs(1),
                operation: "generate".into(),
            }
            .stage(),
            Stage::Inference
        );
        assert!(!BenchError::UnknownTask { name: "x".into() }.is_job_local());
        assert!(BenchError::model("missing weights").is_job_local());
    }
}
