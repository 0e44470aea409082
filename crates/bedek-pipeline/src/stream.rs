//! Stream lifecycle and batch dispatch.
//!
//! A stream is a long-lived, independently controllable unit of record
//! ingestion. Records arrive on a bounded channel, pass the stream's filter
//! and transformation rules, and are buffered into batches. Batches are
//! dispatched with bounded concurrency; `max_concurrent_batches` permits
//! plus the channel bound are the stream's only backpressure — a producer
//! that outruns the stream blocks on `send`, nothing buffers without limit.
//!
//! State machine: `Created → Active → {Paused, Stopped, Error, Completed}`.
//! Only one consumer task may be attached per stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, watch, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use bedek_common::{BedekError, Record, Result};
use bedek_ingest::normalize_record;
use bedek_quality::QualityEngine;

use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT_BATCHES, DEFAULT_QUALITY_THRESHOLD,
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS, DEFAULT_STREAM_TIMEOUT_SECS,
    REALTIME_BATCH_SIZE, REALTIME_POLL_TIMEOUT_SECS,
};
use crate::events::{EventBus, EventKind};
use crate::filter::{apply_transforms, record_passes, FilterRule, TransformRule};
use crate::metrics::StreamMetrics;

/// What feeds the stream. Informational; processing is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    File,
    #[default]
    Api,
    RealTime,
}

/// Immutable per-stream configuration, supplied at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream_id: String,
    #[serde(default)]
    pub stream_type: StreamType,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
    pub quality_threshold: f64,
    pub enable_monitoring: bool,
    #[serde(default)]
    pub filter_rules: Vec<FilterRule>,
    #[serde(default)]
    pub transformation_rules: Vec<TransformRule>,
    /// Validation-rule subset for this stream's batches; `None` runs every
    /// enabled rule.
    #[serde(default)]
    pub rule_ids: Option<Vec<String>>,
}

impl StreamConfig {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            stream_type: StreamType::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            timeout_secs: DEFAULT_STREAM_TIMEOUT_SECS,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            enable_monitoring: true,
            filter_rules: Vec::new(),
            transformation_rules: Vec::new(),
            rule_ids: None,
        }
    }

    /// Real-time streams: tighter batches and timeouts, same machinery.
    pub fn realtime(stream_id: impl Into<String>) -> Self {
        Self {
            stream_type: StreamType::RealTime,
            batch_size: REALTIME_BATCH_SIZE,
            timeout_secs: REALTIME_POLL_TIMEOUT_SECS,
            ..Self::new(stream_id)
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrent_batches(mut self, max: usize) -> Self {
        self.max_concurrent_batches = max;
        self
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn with_filters(mut self, filters: Vec<FilterRule>) -> Self {
        self.filter_rules = filters;
        self
    }

    pub fn with_transforms(mut self, transforms: Vec<TransformRule>) -> Self {
        self.transformation_rules = transforms;
        self
    }

    pub fn with_rule_ids(mut self, rule_ids: Vec<String>) -> Self {
        self.rule_ids = Some(rule_ids);
        self
    }

    pub fn with_retries(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_id.trim().is_empty() {
            return Err(BedekError::Config("stream id must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(BedekError::Config("batch_size must be at least 1".into()));
        }
        if self.max_concurrent_batches == 0 {
            return Err(BedekError::Config(
                "max_concurrent_batches must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(BedekError::Config(format!(
                "quality_threshold must be within [0, 1], got {}",
                self.quality_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Created,
    Active,
    Paused,
    Stopped,
    Error,
    Completed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Created => "created",
            StreamState::Active => "active",
            StreamState::Paused => "paused",
            StreamState::Stopped => "stopped",
            StreamState::Error => "error",
            StreamState::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Stopped | StreamState::Error | StreamState::Completed
        )
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one batch dispatch.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub stream_id: String,
    pub batch_seq: u64,
    pub quality_threshold: f64,
    pub rule_ids: Option<Vec<String>>,
}

/// What became of one batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchOutcome {
    pub processed: u64,
    pub failed: u64,
    /// Overall quality score of the batch.
    pub score: f64,
}

/// The unit of work a stream dispatches. The default implementation
/// normalizes and quality-validates; tests substitute their own.
///
/// Error contract: [`BedekError::StreamFatal`] terminates the stream, any
/// other error is a contained batch failure the stream survives.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, ctx: &BatchContext, records: Vec<Record>) -> Result<BatchOutcome>;
}

/// Normalize every record, then validate the batch as one dataset against
/// the stream's quality threshold.
pub struct QualityBatchProcessor {
    engine: Arc<QualityEngine>,
}

impl QualityBatchProcessor {
    pub fn new(engine: Arc<QualityEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl BatchProcessor for QualityBatchProcessor {
    async fn process(&self, ctx: &BatchContext, mut records: Vec<Record>) -> Result<BatchOutcome> {
        for record in &mut records {
            normalize_record(record);
        }
        let dataset_id = format!("{}:batch-{}", ctx.stream_id, ctx.batch_seq);
        let report = self
            .engine
            .validate_dataset(&records, &dataset_id, ctx.rule_ids.as_deref())
            .await?;
        let size = records.len() as u64;
        let outcome = if report.passes(ctx.quality_threshold) {
            BatchOutcome {
                processed: size,
                failed: 0,
                score: report.overall_score,
            }
        } else {
            BatchOutcome {
                processed: 0,
                failed: size,
                score: report.overall_score,
            }
        };
        Ok(outcome)
    }
}

struct StreamEntry {
    config: Arc<StreamConfig>,
    state: Arc<StdMutex<StreamState>>,
    metrics: Arc<StdMutex<StreamMetrics>>,
    pause: watch::Sender<bool>,
    consumer: Option<JoinHandle<()>>,
}

/// Owns every stream: lifecycle, batching, metrics, events.
pub struct StreamManager {
    streams: RwLock<HashMap<String, StreamEntry>>,
    processor: Arc<dyn BatchProcessor>,
    events: EventBus,
}

impl StreamManager {
    pub fn new(processor: Arc<dyn BatchProcessor>, events: EventBus) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            processor,
            events,
        }
    }

    /// Manager wired to the quality engine, the production configuration.
    pub fn with_quality_engine(engine: Arc<QualityEngine>, events: EventBus) -> Self {
        Self::new(Arc::new(QualityBatchProcessor::new(engine)), events)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register a stream in the `Created` state. Ids are unique.
    pub async fn create_stream(&self, config: StreamConfig) -> Result<()> {
        config.validate()?;
        let mut streams = self.streams.write().await;
        if streams.contains_key(&config.stream_id) {
            return Err(BedekError::Config(format!(
                "stream '{}' already exists",
                config.stream_id
            )));
        }
        let stream_id = config.stream_id.clone();
        let (pause, _) = watch::channel(false);
        streams.insert(
            stream_id.clone(),
            StreamEntry {
                metrics: Arc::new(StdMutex::new(StreamMetrics::new(&stream_id))),
                state: Arc::new(StdMutex::new(StreamState::Created)),
                config: Arc::new(config),
                pause,
                consumer: None,
            },
        );
        info!(stream_id = %stream_id, "stream created");
        self.events
            .publish(EventKind::StreamCreated, json!({ "stream_id": stream_id }));
        Ok(())
    }

    /// Attach the consumer task and hand back the producer side. The
    /// channel holds one full concurrency window of records; a producer
    /// past that blocks until the stream catches up.
    pub async fn start_stream(&self, stream_id: &str) -> Result<mpsc::Sender<Record>> {
        let mut streams = self.streams.write().await;
        let entry = streams
            .get_mut(stream_id)
            .ok_or_else(|| BedekError::NotFound(format!("stream '{stream_id}'")))?;

        {
            let state = lock(&entry.state);
            if *state != StreamState::Created {
                return Err(BedekError::Config(format!(
                    "stream '{stream_id}' cannot start from state '{state}'"
                )));
            }
        }

        let capacity = entry.config.batch_size * entry.config.max_concurrent_batches;
        let (tx, rx) = mpsc::channel(capacity.max(1));

        *lock(&entry.state) = StreamState::Active;
        lock(&entry.metrics).mark_started();

        let consumer = tokio::spawn(consume(
            Arc::clone(&entry.config),
            Arc::clone(&entry.state),
            Arc::clone(&entry.metrics),
            rx,
            entry.pause.subscribe(),
            Arc::clone(&self.processor),
            self.events.clone(),
        ));
        entry.consumer = Some(consumer);

        info!(stream_id, "stream started");
        self.events
            .publish(EventKind::StreamStarted, json!({ "stream_id": stream_id }));
        Ok(tx)
    }

    pub async fn pause_stream(&self, stream_id: &str) -> Result<()> {
        let streams = self.streams.read().await;
        let entry = streams
            .get(stream_id)
            .ok_or_else(|| BedekError::NotFound(format!("stream '{stream_id}'")))?;
        {
            let mut state = lock(&entry.state);
            if *state != StreamState::Active {
                return Err(BedekError::Config(format!(
                    "stream '{stream_id}' cannot pause from state '{state}'"
                )));
            }
            *state = StreamState::Paused;
        }
        let _ = entry.pause.send(true);
        self.events
            .publish(EventKind::StreamPaused, json!({ "stream_id": stream_id }));
        Ok(())
    }

    pub async fn resume_stream(&self, stream_id: &str) -> Result<()> {
        let streams = self.streams.read().await;
        let entry = streams
            .get(stream_id)
            .ok_or_else(|| BedekError::NotFound(format!("stream '{stream_id}'")))?;
        {
            let mut state = lock(&entry.state);
            if *state != StreamState::Paused {
                return Err(BedekError::Config(format!(
                    "stream '{stream_id}' cannot resume from state '{state}'"
                )));
            }
            *state = StreamState::Active;
        }
        let _ = entry.pause.send(false);
        self.events
            .publish(EventKind::StreamResumed, json!({ "stream_id": stream_id }));
        Ok(())
    }

    /// Cancel the consumer and transition to `Stopped`. A batch already in
    /// flight is abandoned without a metric update, so counters never
    /// double-count. Stopping a stream already in a terminal state is a
    /// no-op.
    pub async fn stop_stream(&self, stream_id: &str) -> Result<()> {
        let mut streams = self.streams.write().await;
        let entry = streams
            .get_mut(stream_id)
            .ok_or_else(|| BedekError::NotFound(format!("stream '{stream_id}'")))?;

        {
            let mut state = lock(&entry.state);
            if state.is_terminal() {
                return Ok(());
            }
            *state = StreamState::Stopped;
        }
        if let Some(consumer) = entry.consumer.take() {
            consumer.abort();
        }
        lock(&entry.metrics).mark_ended();
        info!(stream_id, "stream stopped");
        self.events
            .publish(EventKind::StreamStopped, json!({ "stream_id": stream_id }));
        Ok(())
    }

    pub async fn stream_state(&self, stream_id: &str) -> Option<StreamState> {
        let streams = self.streams.read().await;
        streams.get(stream_id).map(|entry| *lock(&entry.state))
    }

    pub async fn stream_metrics(&self, stream_id: &str) -> Option<StreamMetrics> {
        let streams = self.streams.read().await;
        streams
            .get(stream_id)
            .map(|entry| lock(&entry.metrics).clone())
    }

    pub async fn stream_config(&self, stream_id: &str) -> Option<StreamConfig> {
        let streams = self.streams.read().await;
        streams.get(stream_id).map(|entry| (*entry.config).clone())
    }

    pub async fn list_streams(&self) -> Vec<(String, StreamState)> {
        let streams = self.streams.read().await;
        let mut listed: Vec<(String, StreamState)> = streams
            .iter()
            .map(|(id, entry)| (id.clone(), *lock(&entry.state)))
            .collect();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        listed
    }

    pub async fn active_stream_count(&self) -> usize {
        let streams = self.streams.read().await;
        streams
            .values()
            .filter(|entry| !lock(&entry.state).is_terminal())
            .count()
    }

    /// Drop a stream's bookkeeping. Refused while the stream is live; stop
    /// it first.
    pub async fn remove_stream(&self, stream_id: &str) -> Result<()> {
        let mut streams = self.streams.write().await;
        let entry = streams
            .get(stream_id)
            .ok_or_else(|| BedekError::NotFound(format!("stream '{stream_id}'")))?;
        if !lock(&entry.state).is_terminal() {
            return Err(BedekError::Config(format!(
                "stream '{stream_id}' is still live; stop it before removing"
            )));
        }
        streams.remove(stream_id);
        Ok(())
    }

    /// Stop every live stream. Called on orchestrator shutdown.
    pub async fn shutdown(&self) {
        let live: Vec<String> = {
            let streams = self.streams.read().await;
            streams
                .iter()
                .filter(|(_, entry)| !lock(&entry.state).is_terminal())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for stream_id in live {
            if let Err(err) = self.stop_stream(&stream_id).await {
                warn!(stream_id = %stream_id, error = %err, "failed to stop stream at shutdown");
            }
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The single consumer task attached to a started stream.
async fn consume(
    config: Arc<StreamConfig>,
    state: Arc<StdMutex<StreamState>>,
    metrics: Arc<StdMutex<StreamMetrics>>,
    mut rx: mpsc::Receiver<Record>,
    mut pause_rx: watch::Receiver<bool>,
    processor: Arc<dyn BatchProcessor>,
    events: EventBus,
) {
    let stream_id = config.stream_id.clone();
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches));
    let mut inflight: JoinSet<()> = JoinSet::new();
    let mut buffer: Vec<Record> = Vec::with_capacity(config.batch_size);
    let mut batch_seq = 0u64;

    loop {
        // A fatal batch set the state from inside its task.
        if *lock(&state) == StreamState::Error {
            break;
        }

        // Reap finished batches so the JoinSet stays small.
        while inflight.try_join_next().is_some() {}

        match rx.recv().await {
            Some(mut record) => {
                // A record that arrives while the stream is paused is held
                // here, unprocessed, until resume. The pause sender lives
                // in the manager entry for the stream's whole lifetime.
                while *pause_rx.borrow() {
                    if pause_rx.changed().await.is_err() {
                        break;
                    }
                }
                lock(&metrics).record_arrival();
                if !record_passes(&config.filter_rules, &record) {
                    lock(&metrics).record_filtered();
                    continue;
                }
                apply_transforms(&config.transformation_rules, &mut record);
                buffer.push(record);
                if buffer.len() >= config.batch_size {
                    let batch = std::mem::take(&mut buffer);
                    dispatch_batch(
                        batch,
                        batch_seq,
                        &config,
                        &state,
                        &metrics,
                        &semaphore,
                        &mut inflight,
                        &processor,
                        &events,
                    )
                    .await;
                    batch_seq += 1;
                }
            }
            None => {
                if !buffer.is_empty() {
                    let batch = std::mem::take(&mut buffer);
                    dispatch_batch(
                        batch,
                        batch_seq,
                        &config,
                        &state,
                        &metrics,
                        &semaphore,
                        &mut inflight,
                        &processor,
                        &events,
                    )
                    .await;
                }
                break;
            }
        }
    }

    // Let in-flight batches finish before declaring a terminal state.
    while inflight.join_next().await.is_some() {}

    let final_state = {
        let mut current = lock(&state);
        if !current.is_terminal() {
            *current = StreamState::Completed;
        }
        *current
    };
    let (processed, failed) = {
        let mut m = lock(&metrics);
        m.mark_ended();
        (m.processed_records, m.failed_records)
    };
    debug!(stream_id = %stream_id, state = %final_state, processed, failed, "consumer finished");
    if final_state == StreamState::Completed {
        events.publish(
            EventKind::StreamCompleted,
            json!({ "stream_id": stream_id, "processed": processed, "failed": failed }),
        );
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_batch(
    batch: Vec<Record>,
    batch_seq: u64,
    config: &Arc<StreamConfig>,
    state: &Arc<StdMutex<StreamState>>,
    metrics: &Arc<StdMutex<StreamMetrics>>,
    semaphore: &Arc<Semaphore>,
    inflight: &mut JoinSet<()>,
    processor: &Arc<dyn BatchProcessor>,
    events: &EventBus,
) {
    // Backpressure: wait for a concurrency permit before taking the batch
    // in flight. The semaphore is never closed.
    let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
        return;
    };

    let ctx = BatchContext {
        stream_id: config.stream_id.clone(),
        batch_seq,
        quality_threshold: config.quality_threshold,
        rule_ids: config.rule_ids.clone(),
    };
    let config = Arc::clone(config);
    let state = Arc::clone(state);
    let metrics = Arc::clone(metrics);
    let processor = Arc::clone(processor);
    let events = events.clone();

    inflight.spawn(async move {
        let _permit = permit;
        let size = batch.len() as u64;
        let started = Instant::now();

        let mut attempt = 0u32;
        let outcome = loop {
            match processor.process(&ctx, batch.clone()).await {
                Ok(outcome) => break Ok(outcome),
                Err(err @ BedekError::StreamFatal(_)) => break Err(err),
                Err(err) if attempt < config.retry_attempts => {
                    attempt += 1;
                    warn!(
                        stream_id = %ctx.stream_id,
                        batch = ctx.batch_seq,
                        attempt,
                        error = %err,
                        "batch failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                }
                Err(err) => break Err(BedekError::BatchDispatch(err.to_string())),
            }
        };
        let wall_secs = started.elapsed().as_secs_f64();

        // Metric updates are one synchronous critical section: a batch is
        // either fully counted or not at all, even under cancellation.
        match outcome {
            Ok(outcome) => {
                {
                    let mut m = lock(&metrics);
                    m.record_batch(outcome.processed, outcome.failed, wall_secs);
                    if outcome.failed > 0 {
                        m.push_error(format!(
                            "batch {} scored {:.3}, below threshold {:.3}",
                            ctx.batch_seq, outcome.score, ctx.quality_threshold
                        ));
                    }
                }
                events.publish(
                    EventKind::BatchProcessed,
                    json!({
                        "stream_id": ctx.stream_id,
                        "batch": ctx.batch_seq,
                        "size": size,
                        "processed": outcome.processed,
                        "failed": outcome.failed,
                        "score": outcome.score,
                        "secs": wall_secs,
                    }),
                );
            }
            Err(err) => {
                let fatal = matches!(err, BedekError::StreamFatal(_));
                {
                    let mut m = lock(&metrics);
                    m.record_batch(0, size, wall_secs);
                    m.push_error(err.to_string());
                }
                if fatal {
                    *lock(&state) = StreamState::Error;
                    events.publish(
                        EventKind::StreamError,
                        json!({ "stream_id": ctx.stream_id, "error": err.to_string() }),
                    );
                } else {
                    warn!(
                        stream_id = %ctx.stream_id,
                        batch = ctx.batch_seq,
                        error = %err,
                        "batch dispatch failed, stream continues"
                    );
                    events.publish(
                        EventKind::BatchProcessed,
                        json!({
                            "stream_id": ctx.stream_id,
                            "batch": ctx.batch_seq,
                            "size": size,
                            "processed": 0,
                            "failed": size,
                            "error": err.to_string(),
                        }),
                    );
                }
            }
        }
    });
}
