use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{BenchError, Result};
use crate::metrics::MetricsCollector;
use crate::model::{GenerateRequest, GenerationParams, Generator, TextTokenizer};
use crate::types::{BaseRecord, ResultRecord, SpanRecord};
use crate::utils::progress_bar;

use super::common::{BatchTensors, RunControl};
use super::dataset::{InferenceDataset, InferenceRow};

/// How an inference run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Dry run: stopped after the first batch
    DryRunStopped,
}

/// Records produced by an inference run, in dataset order
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutcome {
    pub status: RunStatus,
    pub records: Vec<ResultRecord>,
}

/// Per-run inference settings
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub max_new_tokens: usize,
    /// Copy each row's `id` and `answer_start` into its record
    pub span_ids: bool,
    pub params: GenerationParams,
    pub dry_run: bool,
    pub control: RunControl,
    pub show_progress: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_new_tokens: 32,
            span_ids: false,
            params: GenerationParams::default(),
            dry_run: false,
            control: RunControl::default(),
            show_progress: false,
        }
    }
}

/// Runs a dataset through a generator batch by batch
pub struct BatchProcessor<'a> {
    generator: &'a dyn Generator,
    tokenizer: &'a dyn TextTokenizer,
    metrics: Arc<MetricsCollector>,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(generator: &'a dyn Generator, tokenizer: &'a dyn TextTokenizer, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            generator,
            tokenizer,
            metrics,
        }
    }

    pub async fn run(&self, dataset: &InferenceDataset, settings: &BatchSettings) -> Result<InferenceOutcome> {
        if settings.batch_size == 0 {
            return Err(BenchError::config("generate.batch_size", "must be greater than zero"));
        }

        // Continuations are padded with eos
        let pad_token_id = self
            .tokenizer
            .eos_token_id()
            .or_else(|| self.tokenizer.pad_token_id())
            .ok_or_else(|| BenchError::tokenizer("tokenizer defines neither an eos nor a pad token"))?;

        let request = GenerateRequest {
            max_new_tokens: settings.max_new_tokens,
            pad_token_id,
            eos_token_id: self.tokenizer.eos_token_id(),
            params: settings.params.clone(),
        };

        let total_batches = (dataset.len() + settings.batch_size - 1) / settings.batch_size;
        let progress = progress_bar(total_batches, "Generating", settings.show_progress);
        let mut records = Vec::with_capacity(dataset.len());
        let mut status = RunStatus::Completed;

        for (index, rows) in dataset.batches(settings.batch_size).enumerate() {
            settings.control.check("generate")?;

            let batch_records = self.process_batch(index, rows, &request, settings).await?;
            records.extend(batch_records);
            progress.inc(1);

            if settings.dry_run {
                info!("Dry run: stopping after batch {} of {}", index + 1, total_batches);
                status = RunStatus::DryRunStopped;
                break;
            }
        }
        progress.finish_and_clear();

        Ok(InferenceOutcome { status, records })
    }

    async fn process_batch(
        &self,
        index: usize,
        rows: &[InferenceRow],
        request: &GenerateRequest,
        settings: &BatchSettings,
    ) -> Result<Vec<ResultRecord>> {
        let start = Instant::now();
        let tensors = BatchTensors::stack(
            rows.iter().map(|row| (row.input_ids.as_slice(), row.attention_mask.as_slice())),
            self.generator.device(),
        )?;

        let output = settings
            .control
            .run(
                "generate",
                self.generator.generate(&tensors.input_ids, &tensors.attention_mask, request),
            )
            .await
            .map_err(|e| match e {
                BenchError::TimeoutError { .. } | BenchError::Cancelled { .. } => e,
                other => BenchError::GenerationError {
                    batch: index,
                    message: other.to_string(),
                },
            })?;

        let continuations = Self::continuations(index, &output, rows.len(), tensors.width)?;
        let generated_tokens: usize = continuations
            .iter()
            .map(|c| c.iter().filter(|t| **t != request.pad_token_id).count())
            .sum();

        let decoded = self
            .tokenizer
            .decode_batch(&continuations, true)
            .map_err(|e| BenchError::GenerationError {
                batch: index,
                message: format!("decoding failed: {}", e),
            })?;

        let duration = start.elapsed();
        self.metrics.record_batch(rows.len(), generated_tokens, duration);
        debug!("Batch {}: {} rows, {} tokens in {:?}", index, rows.len(), generated_tokens, duration);

        rows.iter()
            .zip(decoded)
            .map(|(row, text)| Self::record(index, row, text, settings.span_ids))
            .collect()
    }

    /// Tokens past the input width for each row
    fn continuations(index: usize, output: &candle_core::Tensor, batch: usize, width: usize) -> Result<Vec<Vec<u32>>> {
        let (rows, total) = output.dims2()?;
        if rows != batch || total < width {
            return Err(BenchError::GenerationError {
                batch: index,
                message: format!(
                    "generator returned shape ({}, {}) for a batch of {} rows of width {}",
                    rows, total, batch, width
                ),
            });
        }

        Ok(output.narrow(1, width, total - width)?.to_vec2::<u32>()?)
    }

    fn record(index: usize, row: &InferenceRow, text: String, span_ids: bool) -> Result<ResultRecord> {
        let record = BaseRecord {
            messages: row.example.messages.clone(),
            expected: row.example.expected.clone(),
            input: row.prompt.clone(),
            output: text.trim().to_string(),
        };

        if !span_ids {
            return Ok(ResultRecord::Base(record));
        }

        let span = row.example.span.as_ref().ok_or_else(|| BenchError::GenerationError {
            batch: index,
            message: "row is missing id/answer_start for a span extraction task".to_string(),
        })?;
        Ok(ResultRecord::WithSpan(SpanRecord {
            record,
            id: span.id.clone(),
            answer_start: span.answer_start.clone(),
        }))
    }
}
