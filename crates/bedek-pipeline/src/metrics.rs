//! Per-stream processing metrics.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Most recent error messages retained per stream. A bounded ring, never
/// the full history, so a pathological stream cannot grow memory.
pub const ERROR_RING_CAPACITY: usize = 50;

/// Counters and rates for one stream. Mutated only by the stream's
/// consumer task while the stream is active; read by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct StreamMetrics {
    pub stream_id: String,
    /// Records accepted into the stream (before filtering).
    pub total_records: u64,
    pub processed_records: u64,
    pub failed_records: u64,
    /// Records removed by filter rules; neither processed nor failed.
    pub filtered_records: u64,
    /// Records/second of the most recent dispatched batch.
    pub throughput: f64,
    /// Running mean of batch wall-clock seconds.
    pub avg_batch_secs: f64,
    pub batches_dispatched: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub errors: VecDeque<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StreamMetrics {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            total_records: 0,
            processed_records: 0,
            failed_records: 0,
            filtered_records: 0,
            throughput: 0.0,
            avg_batch_secs: 0.0,
            batches_dispatched: 0,
            last_activity: None,
            errors: VecDeque::new(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn mark_started(&mut self) {
        let now = Utc::now();
        self.started_at = Some(now);
        self.last_activity = Some(now);
    }

    pub fn mark_ended(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn record_arrival(&mut self) {
        self.total_records += 1;
        self.last_activity = Some(Utc::now());
    }

    pub fn record_filtered(&mut self) {
        self.filtered_records += 1;
    }

    /// Fold one finished batch into the counters. Throughput is recomputed
    /// from this batch alone; the running mean tracks batch duration.
    pub fn record_batch(&mut self, processed: u64, failed: u64, wall_secs: f64) {
        self.processed_records += processed;
        self.failed_records += failed;
        let size = processed + failed;
        if wall_secs > 0.0 {
            self.throughput = size as f64 / wall_secs;
        }
        let n = self.batches_dispatched as f64;
        self.avg_batch_secs = (self.avg_batch_secs * n + wall_secs) / (n + 1.0);
        self.batches_dispatched += 1;
        self.last_activity = Some(Utc::now());
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push_back(message.into());
        while self.errors.len() > ERROR_RING_CAPACITY {
            self.errors.pop_front();
        }
    }

    /// Recent errors, oldest first.
    pub fn recent_errors(&self) -> Vec<String> {
        self.errors.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_recomputed_per_batch() {
        let mut metrics = StreamMetrics::new("s1");
        metrics.record_batch(10, 0, 2.0);
        assert_eq!(metrics.throughput, 5.0);
        metrics.record_batch(10, 0, 0.5);
        assert_eq!(metrics.throughput, 20.0);
        assert!(metrics.throughput >= 0.0);
        assert_eq!(metrics.batches_dispatched, 2);
        assert!((metrics.avg_batch_secs - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration_batch_keeps_last_throughput() {
        let mut metrics = StreamMetrics::new("s1");
        metrics.record_batch(4, 0, 2.0);
        metrics.record_batch(4, 0, 0.0);
        assert_eq!(metrics.throughput, 2.0);
        assert_eq!(metrics.processed_records, 8);
    }

    #[test]
    fn test_error_ring_is_bounded() {
        let mut metrics = StreamMetrics::new("s1");
        for i in 0..(ERROR_RING_CAPACITY + 10) {
            metrics.push_error(format!("error {i}"));
        }
        assert_eq!(metrics.errors.len(), ERROR_RING_CAPACITY);
        assert_eq!(metrics.errors.front().unwrap(), "error 10");
    }

    #[test]
    fn test_counts_never_exceed_total() {
        let mut metrics = StreamMetrics::new("s1");
        for _ in 0..10 {
            metrics.record_arrival();
        }
        metrics.record_filtered();
        metrics.record_batch(6, 3, 1.0);
        assert!(metrics.processed_records + metrics.failed_records <= metrics.total_records);
    }
}
