use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::{MetricsSnapshot, MAX_METRICS_HISTORY};

/// Collects generation throughput and job outcomes
pub struct MetricsCollector {
    state: RwLock<MetricsState>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_rows: usize,
    total_tokens: usize,
    total_generation_time: Duration,
    total_batches: usize,

    // Bounded latency history
    batch_latencies: Vec<Duration>,

    jobs_completed: usize,
    jobs_failed: usize,
    error_types: Vec<(String, usize)>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MetricsState::default()),
            start_time: Instant::now(),
        }
    }

    /// Record one generation call
    pub fn record_batch(&self, rows: usize, generated_tokens: usize, duration: Duration) {
        let mut state = self.state.write();
        state.total_rows += rows;
        state.total_tokens += generated_tokens;
        state.total_generation_time += duration;
        state.total_batches += 1;

        state.batch_latencies.push(duration);
        if state.batch_latencies.len() > MAX_METRICS_HISTORY {
            state.batch_latencies.remove(0);
        }
    }

    pub fn record_job(&self, succeeded: bool) {
        let mut state = self.state.write();
        if succeeded {
            state.jobs_completed += 1;
        } else {
            state.jobs_failed += 1;
        }
    }

    pub fn record_error(&self, error_type: &str) {
        let mut state = self.state.write();
        if let Some(entry) = state.error_types.iter_mut().find(|(t, _)| t == error_type) {
            entry.1 += 1;
        } else {
            state.error_types.push((error_type.to_string(), 1));
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read();

        let tokens_per_second = if state.total_generation_time.is_zero() {
            0.0
        } else {
            state.total_tokens as f32 / state.total_generation_time.as_secs_f32()
        };

        let average_batch_latency = if state.batch_latencies.is_empty() {
            Duration::ZERO
        } else {
            state.batch_latencies.iter().sum::<Duration>() / state.batch_latencies.len() as u32
        };

        let mut sorted = state.batch_latencies.clone();
        sorted.sort();
        let p95_batch_latency = sorted
            .get((sorted.len() as f64 * 0.95) as usize)
            .or_else(|| sorted.last())
            .copied()
            .unwrap_or_default();

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            batches: state.total_batches,
            rows: state.total_rows,
            generated_tokens: state.total_tokens,
            generation_time: state.total_generation_time,
            tokens_per_second,
            average_batch_latency,
            p95_batch_latency,
            jobs_completed: state.jobs_completed,
            jobs_failed: state.jobs_failed,
            error_types: state.error_types.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
