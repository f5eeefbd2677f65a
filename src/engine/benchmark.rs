use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{BenchError, Result, Stage};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::model::{Backend, GenerationParams};
use crate::processing::{BatchProcessor, BatchSettings, DatasetBuilder, RunControl, RunStatus};
use crate::registry::Registry;
use crate::template::{resolve_template, RenderOptions};
use crate::types::ResultRecord;

use super::jobs::{build_jobs, output_stem, Job};

/// Run-wide options that are not part of the experiment document
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop each job after its first batch
    pub dry_run: bool,
    /// Report build and inference failures per job instead of aborting the run
    pub continue_on_error: bool,
    pub control: RunControl,
    pub show_progress: bool,
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    DryRunStopped,
    Failed { stage: Stage, message: String },
}

impl From<RunStatus> for JobStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => JobStatus::Completed,
            RunStatus::DryRunStopped => JobStatus::DryRunStopped,
        }
    }
}

/// Records produced by one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    /// Position in the job plan
    pub index: usize,
    pub label: String,
    pub task: String,
    pub model: String,
    pub status: JobStatus,
    pub records: Vec<ResultRecord>,
}

impl JobOutcome {
    /// Stem of the file this job's records are written to
    pub fn output_stem(&self) -> String {
        output_stem(self.index, &self.label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub label: String,
    pub status: JobStatus,
    pub records: usize,
}

/// Result of [`Benchmark::run_all`]
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub jobs: Vec<JobSummary>,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| matches!(job.status, JobStatus::Failed { .. }))
            .count()
    }
}

/// A validated experiment bound to a registry and a model backend
pub struct Benchmark {
    pub(super) config: Arc<Config>,
    pub(super) registry: Registry,
    pub(super) backend: Arc<dyn Backend>,
    pub(super) options: RunOptions,
    pub(super) metrics: Arc<MetricsCollector>,
}

impl Benchmark {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Job plan in execution order
    pub fn jobs(&self) -> Vec<Job<'_>> {
        build_jobs(&self.config)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Build the job's dataset, load its model and run inference
    pub async fn run_job(&self, job: &Job<'_>) -> Result<JobOutcome> {
        let label = job.label();
        info!("Starting job {} ({})", job.index, label);

        let task = self.registry.tasks.create(job.task)?;
        let tokenizer = self.backend.load_tokenizer(&job.model.tokenizer)?;
        let template = resolve_template(&job.model.template, tokenizer.chat_template(), &self.registry.templates)?;
        let render_options = RenderOptions::from_args(&job.model.template.args)?;
        let params = GenerationParams::from_args(&job.model.generate.args)?;

        let dataset = DatasetBuilder::new(task.as_ref(), template.as_ref(), tokenizer.as_ref())
            .with_render_options(render_options)
            .with_num_shots(job.task.num_shots)
            .with_system_style(job.model.template.system_style)
            .with_max_length(tokenizer.max_length())
            .with_progress(self.options.show_progress)
            .build()?;

        let generator = self.backend.load_generator(job.model).await?;
        let processor = BatchProcessor::new(generator.as_ref(), tokenizer.as_ref(), self.metrics.clone());
        let settings = BatchSettings {
            batch_size: job.model.generate.batch_size,
            max_new_tokens: task.max_new_tokens(),
            span_ids: task.kind().emits_span_ids(),
            params,
            dry_run: self.options.dry_run,
            control: self.options.control.clone(),
            show_progress: self.options.show_progress,
        };
        let outcome = processor.run(&dataset, &settings).await?;

        info!("Finished job {}: {} records ({:?})", label, outcome.records.len(), outcome.status);
        Ok(JobOutcome {
            index: job.index,
            label,
            task: job.task.name.clone(),
            model: job.model.label(),
            status: outcome.status.into(),
            records: outcome.records,
        })
    }

    /// Run every job in order, handing each outcome to `on_outcome`.
    ///
    /// Configuration errors, cancellation and errors from `on_outcome` always abort.
    pub async fn run_all<F>(&self, mut on_outcome: F) -> Result<RunSummary>
    where
        F: FnMut(&JobOutcome) -> Result<()>,
    {
        let jobs = self.jobs();
        info!("Running experiment '{}': {} jobs", self.config.experiment, jobs.len());

        let mut summary = RunSummary::default();
        for job in &jobs {
            match self.run_job(job).await {
                Ok(outcome) => {
                    self.metrics.record_job(true);
                    on_outcome(&outcome)?;
                    summary.jobs.push(JobSummary {
                        label: outcome.label,
                        status: outcome.status,
                        records: outcome.records.len(),
                    });
                }
                Err(e) => {
                    self.metrics.record_job(false);
                    self.metrics.record_error(error_kind(&e));

                    let fatal = !e.is_job_local() || matches!(e, BenchError::Cancelled { .. });
                    if fatal || !self.options.continue_on_error {
                        error!("Job {} failed: {}", job.label(), e);
                        return Err(e);
                    }

                    warn!("Job {} failed, continuing: {}", job.label(), e);
                    summary.jobs.push(JobSummary {
                        label: job.label(),
                        status: JobStatus::Failed {
                            stage: e.stage(),
                            message: e.to_string(),
                        },
                        records: 0,
                    });
                }
            }
        }

        Ok(summary)
    }
}

fn error_kind(error: &BenchError) -> &'static str {
    match error {
        BenchError::TimeoutError { .. } => "timeout",
        BenchError::Cancelled { .. } => "cancelled",
        BenchError::GenerationError { .. } | BenchError::Tensor(_) => "generation",
        BenchError::TokenizerError { .. } => "tokenizer",
        BenchError::ModelError { .. } => "model",
        BenchError::TaskError { .. } | BenchError::Io(_) | BenchError::Json(_) => "task",
        BenchError::TemplateError { .. } => "template",
        _ => "configuration",
    }
}
