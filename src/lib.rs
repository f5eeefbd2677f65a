//! LLM Bench - config-driven benchmark runner for local language models
//!
//! An experiment document names tasks and models. Every (task, model) pair
//! becomes a job: the task's examples are rendered with a chat template,
//! tokenized, and run through the model in batches, producing one result
//! record per example.

use std::fmt;

pub mod config;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod metrics;
pub mod model;
pub mod processing;
pub mod registry;
pub mod tasks;
pub mod template;
pub mod types;
pub mod utils;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::{load_config, parse_config, Config, ModelConfig, NameLookup, TaskConfig};
pub use engine::{build_jobs, Benchmark, BenchmarkBuilder, Job, JobOutcome, JobStatus, RunOptions, RunSummary};
pub use error::{BenchError, Result, Stage};
pub use processing::{CancellationToken, RunControl};
pub use registry::Registry;
pub use types::{Example, Message, ResultRecord, Role};

/// Compute backends this build can use
pub struct Features {
    /// Whether the crate was built with CUDA support
    pub cuda: bool,
    /// Whether a CUDA device is usable at runtime
    pub cuda_available: bool,
}

impl Features {
    /// Detect available features at runtime
    pub fn detect() -> Self {
        Self {
            cuda: cfg!(feature = "cuda"),
            cuda_available: candle_core::utils::cuda_is_available(),
        }
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CUDA support: {}", if self.cuda { "yes" } else { "no" })?;
        if self.cuda {
            writeln!(f, "CUDA device available: {}", if self.cuda_available { "yes" } else { "no" })?;
        }
        Ok(())
    }
}
