use crate::config::{Config, ModelConfig, TaskConfig};

/// One (task, model) pairing of an experiment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Job<'a> {
    /// Position in the job plan
    pub index: usize,
    pub task: &'a TaskConfig,
    pub model: &'a ModelConfig,
}

impl Job<'_> {
    /// `<task>__<model>`
    pub fn label(&self) -> String {
        format!("{}__{}", self.task.name, self.model.label())
    }

    /// Output file stem, unique within a plan even when labels repeat
    pub fn output_stem(&self) -> String {
        output_stem(self.index, &self.label())
    }
}

/// `<index>__<label>` with path separators replaced, since model names may be hub-style paths
pub(crate) fn output_stem(index: usize, label: &str) -> String {
    format!("{:03}__{}", index, label.replace(['/', '\\'], "_"))
}

/// Every task paired with every model, tasks varying slowest
pub fn build_jobs(config: &Config) -> Vec<Job<'_>> {
    config
        .tasks
        .iter()
        .flat_map(|task| config.models.iter().map(move |model| (task, model)))
        .enumerate()
        .map(|(index, (task, model))| Job { index, task, model })
        .collect()
}
