use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    units_completed: AtomicU64,
    units_failed: AtomicU64,
    units_skipped: AtomicU64,
    phases_committed: AtomicU64,
    phases_resumed: AtomicU64,
    chunks_sent: AtomicU64,
    chunks_skipped: AtomicU64,
    calls_made: AtomicU64,
    continuations: AtomicU64,
    retry_count: AtomicU64,
    failure_count: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_micro_usd: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub units_completed: u64,
    pub units_failed: u64,
    pub units_skipped: u64,
    pub phases_committed: u64,
    /// Phases skipped because the store already had them done.
    pub phases_resumed: u64,
    pub chunks_sent: u64,
    pub chunks_skipped: u64,
    pub calls_made: u64,
    pub continuations: u64,
    pub retry_count: u64,
    pub failure_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Estimated spend in millionths of a US dollar.
    pub cost_micro_usd: u64,
}

impl MetricsSnapshot {
    pub fn estimated_cost_usd(&self) -> f64 {
        self.cost_micro_usd as f64 / 1_000_000.0
    }
}

macro_rules! counter {
    ($name:ident, $field:ident) => {
        pub fn $name(&self, count: u64) {
            self.inner.$field.fetch_add(count, Ordering::Relaxed);
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    counter!(increment_units_completed, units_completed);
    counter!(increment_units_failed, units_failed);
    counter!(increment_units_skipped, units_skipped);
    counter!(increment_phases_committed, phases_committed);
    counter!(increment_phases_resumed, phases_resumed);
    counter!(increment_chunks_sent, chunks_sent);
    counter!(increment_chunks_skipped, chunks_skipped);
    counter!(increment_calls, calls_made);
    counter!(increment_continuations, continuations);
    counter!(increment_retries, retry_count);
    counter!(increment_failures, failure_count);

    pub fn record_usage(&self, input_tokens: u64, output_tokens: u64) {
        self.inner
            .input_tokens
            .fetch_add(input_tokens, Ordering::Relaxed);
        self.inner
            .output_tokens
            .fetch_add(output_tokens, Ordering::Relaxed);
    }

    /// Adds an estimated charge; negative or non-finite amounts are ignored.
    pub fn record_cost(&self, usd: f64) {
        if usd.is_finite() && usd > 0.0 {
            let micros = (usd * 1_000_000.0).round() as u64;
            self.inner.cost_micro_usd.fetch_add(micros, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let i = &self.inner;
        MetricsSnapshot {
            units_completed: i.units_completed.load(Ordering::Relaxed),
            units_failed: i.units_failed.load(Ordering::Relaxed),
            units_skipped: i.units_skipped.load(Ordering::Relaxed),
            phases_committed: i.phases_committed.load(Ordering::Relaxed),
            phases_resumed: i.phases_resumed.load(Ordering::Relaxed),
            chunks_sent: i.chunks_sent.load(Ordering::Relaxed),
            chunks_skipped: i.chunks_skipped.load(Ordering::Relaxed),
            calls_made: i.calls_made.load(Ordering::Relaxed),
            continuations: i.continuations.load(Ordering::Relaxed),
            retry_count: i.retry_count.load(Ordering::Relaxed),
            failure_count: i.failure_count.load(Ordering::Relaxed),
            input_tokens: i.input_tokens.load(Ordering::Relaxed),
            output_tokens: i.output_tokens.load(Ordering::Relaxed),
            cost_micro_usd: i.cost_micro_usd.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
