//! Generation throughput and job outcome metrics

mod collector;
mod types;

pub use collector::MetricsCollector;
pub use types::MetricsSnapshot;

pub(crate) const MAX_METRICS_HISTORY: usize = 1000;
