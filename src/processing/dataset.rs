use tracing::{debug, info};

use crate::config::SystemStyle;
use crate::error::{BenchError, Result};
use crate::model::TextTokenizer;
use crate::tasks::Task;
use crate::template::{ChatTemplate, RenderOptions};
use crate::types::Example;
use crate::utils::progress_bar;

/// One example ready for generation
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRow {
    pub example: Example,
    /// Rendered prompt text
    pub prompt: String,
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

/// Tokenized examples, all padded to one length
#[derive(Debug, Clone, Default)]
pub struct InferenceDataset {
    rows: Vec<InferenceRow>,
    max_length: usize,
}

impl InferenceDataset {
    pub fn rows(&self) -> &[InferenceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Padded length shared by every row
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Contiguous batches in dataset order; the last may be short
    pub fn batches(&self, batch_size: usize) -> std::slice::Chunks<'_, InferenceRow> {
        self.rows.chunks(batch_size.max(1))
    }
}

/// Renders a task's conversations and tokenizes the resulting prompts
pub struct DatasetBuilder<'a> {
    task: &'a dyn Task,
    template: &'a dyn ChatTemplate,
    tokenizer: &'a dyn TextTokenizer,
    render_options: RenderOptions,
    num_shots: usize,
    system_style: SystemStyle,
    max_length: Option<usize>,
    show_progress: bool,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(task: &'a dyn Task, template: &'a dyn ChatTemplate, tokenizer: &'a dyn TextTokenizer) -> Self {
        Self {
            task,
            template,
            tokenizer,
            render_options: RenderOptions {
                add_generation_prompt: true,
            },
            num_shots: 0,
            system_style: SystemStyle::default(),
            max_length: None,
            show_progress: false,
        }
    }

    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        self.render_options = options;
        self
    }

    pub fn with_num_shots(mut self, num_shots: usize) -> Self {
        self.num_shots = num_shots;
        self
    }

    pub fn with_system_style(mut self, style: SystemStyle) -> Self {
        self.system_style = style;
        self
    }

    /// Pad to this many tokens instead of the longest prompt
    pub fn with_max_length(mut self, max_length: Option<usize>) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn build(self) -> Result<InferenceDataset> {
        let expected = self.task.len();
        let progress = progress_bar(expected, "Rendering", self.show_progress);

        let mut examples = Vec::with_capacity(expected);
        let mut prompts = Vec::with_capacity(expected);
        for example in self.task.build(self.num_shots, self.system_style) {
            let example = example?;
            prompts.push(self.template.render(&example.messages, &self.render_options)?);
            examples.push(example);
            progress.inc(1);
        }
        progress.finish_and_clear();

        if examples.len() != expected {
            return Err(BenchError::task(
                self.task.name(),
                format!("produced {} examples but declares {}", examples.len(), expected),
            ));
        }

        let sequences = self.tokenizer.encode_padded(&prompts, self.max_length)?;
        let max_length = sequences.first().map_or(0, |s| s.token_ids.len());
        debug!(
            "Tokenized {} prompts to length {} with template '{}'",
            prompts.len(),
            max_length,
            self.template.name()
        );

        let rows: Vec<InferenceRow> = examples
            .into_iter()
            .zip(prompts)
            .zip(sequences)
            .map(|((example, prompt), sequence)| InferenceRow {
                example,
                prompt,
                input_ids: sequence.token_ids,
                attention_mask: sequence.attention_mask,
            })
            .collect();

        info!("Built dataset for task '{}': {} rows", self.task.name(), rows.len());
        Ok(InferenceDataset { rows, max_length })
    }
}
