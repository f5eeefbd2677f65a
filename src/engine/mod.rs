//! Orchestration: the job plan and running it against a model backend

mod benchmark;
mod builder;
mod jobs;

pub use benchmark::{Benchmark, JobOutcome, JobStatus, JobSummary, RunOptions, RunSummary};
pub use builder::BenchmarkBuilder;
pub use jobs::{build_jobs, Job};
