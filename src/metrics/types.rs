use std::time::Duration;

use serde::Serialize;

/// Snapshot of collected metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Time since the collector was created
    pub uptime: Duration,

    /// Generation calls issued
    pub batches: usize,

    /// Rows sent through generation
    pub rows: usize,

    /// Non-padding tokens generated
    pub generated_tokens: usize,

    /// Time spent inside generation calls
    pub generation_time: Duration,

    pub tokens_per_second: f32,

    pub average_batch_latency: Duration,

    /// 95th percentile batch latency
    pub p95_batch_latency: Duration,

    pub jobs_completed: usize,

    pub jobs_failed: usize,

    /// Error counts keyed by error kind
    pub error_types: Vec<(String, usize)>,
}
