//! Dataset construction and batched inference

mod batch;
mod common;
pub(crate) mod dataset;

pub use batch::{BatchProcessor, BatchSettings, InferenceOutcome, RunStatus};
pub use common::{strip_padding, BatchTensors, CancellationToken, PaddingSide, RunControl, TokenSequence};
pub use dataset::{DatasetBuilder, InferenceDataset, InferenceRow};
