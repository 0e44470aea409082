//! Session orchestration.
//!
//! The orchestrator accepts processing requests, wraps each in a session,
//! queues sessions by priority, and routes them to the batch path or a
//! stream according to the request's mode. Background loops dispatch
//! sessions, publish pipeline metrics, and sweep stale sessions; every
//! loop's handle is retained so shutdown can cancel it deterministically.
//!
//! Containment: one session's failure never cancels or corrupts a sibling.
//! Session state is private to the session object; collaborators see
//! snapshots.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch, Notify, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use bedek_common::{BedekError, Record, Result};
use bedek_ingest::{normalize_record, Ingestor};
use bedek_quality::{QualityEngine, QualityEngineConfig, QualityReport};

use crate::config::{PipelineConfig, REALTIME_POLL_TIMEOUT_SECS};
use crate::control::ControlCommand;
use crate::events::{EventBus, EventKind, PipelineEvent};
use crate::insight::{InsightBridge, NoopInsightBridge};
use crate::session::{
    ProcessingMode, ProcessingRequest, ProcessingSession, RequestSource, SessionStatus,
    SessionStatusSnapshot,
};
use crate::stream::{StreamConfig, StreamManager, StreamState};

/// How often the dispatch loop re-checks an idle queue, and how often the
/// stream poll loop samples stream state.
const POLL_TICK: Duration = Duration::from_millis(50);

/// Queue entry: lower priority value first, then submission time, then
/// submission sequence. Fully deterministic order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedEntry {
    priority: u8,
    submitted_at: DateTime<Utc>,
    seq: u64,
    session_id: Uuid,
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest key out
        // first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    config: PipelineConfig,
    ingestor: Ingestor,
    engine: Arc<QualityEngine>,
    streams: StreamManager,
    events: EventBus,
    insight: Arc<dyn InsightBridge>,
    sessions: RwLock<HashMap<Uuid, ProcessingSession>>,
    queue: StdMutex<BinaryHeap<QueuedEntry>>,
    queue_notify: Notify,
    seq: AtomicU64,
}

/// The pipeline front door. Explicitly constructed and injected; start and
/// shutdown are explicit calls, never implicit first-use side effects.
pub struct Orchestrator {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    control_tx: mpsc::Sender<ControlCommand>,
    control_rx: StdMutex<Option<mpsc::Receiver<ControlCommand>>>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Orchestrator with the default engine, no-op insight bridge, and a
    /// freshly wired stream manager.
    pub fn new(config: PipelineConfig) -> Self {
        let engine = Arc::new(QualityEngine::new(QualityEngineConfig::default()));
        Self::with_parts(
            config,
            Ingestor::default(),
            engine,
            Arc::new(NoopInsightBridge),
        )
    }

    pub fn with_parts(
        config: PipelineConfig,
        ingestor: Ingestor,
        engine: Arc<QualityEngine>,
        insight: Arc<dyn InsightBridge>,
    ) -> Self {
        let events = EventBus::new(config.event_channel_capacity);
        let streams = StreamManager::with_quality_engine(Arc::clone(&engine), events.clone());
        let (shutdown_tx, _) = watch::channel(false);
        let (control_tx, control_rx) = mpsc::channel(32);
        Self {
            inner: Arc::new(Inner {
                config,
                ingestor,
                engine,
                streams,
                events,
                insight,
                sessions: RwLock::new(HashMap::new()),
                queue: StdMutex::new(BinaryHeap::new()),
                queue_notify: Notify::new(),
                seq: AtomicU64::new(0),
            }),
            shutdown_tx,
            control_tx,
            control_rx: StdMutex::new(Some(control_rx)),
            handles: StdMutex::new(Vec::new()),
        }
    }

    pub fn engine(&self) -> &Arc<QualityEngine> {
        &self.inner.engine
    }

    pub fn streams(&self) -> &StreamManager {
        &self.inner.streams
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Handle for the operational-control collaborator.
    pub fn control_sender(&self) -> mpsc::Sender<ControlCommand> {
        self.control_tx.clone()
    }

    /// Queue a request. Returns the session id for status polling.
    pub async fn submit(&self, request: ProcessingRequest) -> Result<Uuid> {
        request.validate()?;
        let session = ProcessingSession::new(request);
        let session_id = session.id;
        let entry = QueuedEntry {
            priority: session.priority,
            submitted_at: session.submitted_at,
            seq: self.inner.seq.fetch_add(1, AtomicOrdering::Relaxed),
            session_id,
        };
        let mode = session.mode;
        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.insert(session_id, session);
        }
        lock(&self.inner.queue).push(entry);
        self.inner.queue_notify.notify_one();
        info!(session_id = %session_id, mode = %mode, "session submitted");
        self.inner.events.publish(
            EventKind::SessionSubmitted,
            json!({ "session_id": session_id, "mode": mode.as_str() }),
        );
        Ok(session_id)
    }

    pub async fn session_status(&self, session_id: Uuid) -> Option<SessionStatusSnapshot> {
        let sessions = self.inner.sessions.read().await;
        sessions.get(&session_id).map(ProcessingSession::snapshot)
    }

    /// Quality reports a session has accumulated so far.
    pub async fn session_reports(&self, session_id: Uuid) -> Vec<QualityReport> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&session_id)
            .map(|session| session.reports.clone())
            .unwrap_or_default()
    }

    /// Spawn the background loops: dispatch, metrics, stale-session sweep,
    /// control. Safe to call once; later calls are ignored.
    pub fn start(&self) {
        let mut handles = lock(&self.handles);
        if !handles.is_empty() {
            return;
        }

        handles.push(tokio::spawn(dispatch_loop(
            Arc::clone(&self.inner),
            self.shutdown_tx.subscribe(),
        )));
        handles.push(tokio::spawn(sweep_loop(
            Arc::clone(&self.inner),
            self.shutdown_tx.subscribe(),
        )));
        if self.inner.config.enable_monitoring {
            handles.push(tokio::spawn(monitor_loop(
                Arc::clone(&self.inner),
                self.shutdown_tx.subscribe(),
            )));
        }
        if let Some(control_rx) = lock(&self.control_rx).take() {
            handles.push(tokio::spawn(control_loop(
                Arc::clone(&self.inner),
                control_rx,
                self.shutdown_tx.subscribe(),
            )));
        }
        info!("orchestrator started");
    }

    /// Stop every background loop and every live stream. Loops get a
    /// short grace period to observe the flag, then are cancelled.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.inner.queue_notify.notify_waiters();
        self.inner.streams.shutdown().await;

        let handles: Vec<JoinHandle<()>> = lock(&self.handles).drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout(Duration::from_secs(2), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
        info!("orchestrator stopped");
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn with_session<F>(inner: &Arc<Inner>, session_id: Uuid, f: F)
where
    F: FnOnce(&mut ProcessingSession),
{
    let mut sessions = inner.sessions.write().await;
    if let Some(session) = sessions.get_mut(&session_id) {
        f(session);
    }
}

// === background loops ===

async fn dispatch_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut runners: JoinSet<()> = JoinSet::new();
    loop {
        if *shutdown.borrow() {
            break;
        }
        while runners.try_join_next().is_some() {}

        let next = lock(&inner.queue).pop();
        match next {
            Some(entry) => {
                let prepared = {
                    let mut sessions = inner.sessions.write().await;
                    sessions.get_mut(&entry.session_id).and_then(|session| {
                        session.status = SessionStatus::Processing;
                        session.started_at = Some(Utc::now());
                        session.source.take().map(|source| {
                            (
                                session.mode,
                                source,
                                session.rule_ids.clone(),
                                session.quality_threshold,
                            )
                        })
                    })
                };
                if let Some((mode, source, rule_ids, threshold)) = prepared {
                    let inner = Arc::clone(&inner);
                    runners.spawn(async move {
                        run_session(inner, entry.session_id, mode, source, rule_ids, threshold)
                            .await;
                    });
                }
            }
            None => {
                tokio::select! {
                    _ = inner.queue_notify.notified() => {}
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(POLL_TICK) => {}
                }
            }
        }
    }
    // Dropping the JoinSet cancels any still-running session tasks.
}

async fn monitor_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(inner.config.monitor_interval_secs.max(1));
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        publish_pipeline_metrics(&inner).await;
    }
}

async fn publish_pipeline_metrics(inner: &Arc<Inner>) {
    let (active, processing, completed, failed) = {
        let sessions = inner.sessions.read().await;
        let mut counts = (0usize, 0usize, 0usize, 0usize);
        for session in sessions.values() {
            match session.status {
                SessionStatus::Active => counts.0 += 1,
                SessionStatus::Processing => counts.1 += 1,
                SessionStatus::Completed => counts.2 += 1,
                SessionStatus::Failed => counts.3 += 1,
            }
        }
        counts
    };
    let queued = lock(&inner.queue).len();
    let active_streams = inner.streams.active_stream_count().await;
    inner.events.publish(
        EventKind::PipelineMetrics,
        json!({
            "sessions_active": active,
            "sessions_processing": processing,
            "sessions_completed": completed,
            "sessions_failed": failed,
            "sessions_queued": queued,
            "active_streams": active_streams,
        }),
    );
}

async fn sweep_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(inner.config.sweep_interval_secs.max(1));
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        let purged = sweep_stale_sessions(&inner).await;
        if purged > 0 {
            debug!(purged, "stale sessions swept");
        }
    }
}

/// Remove sessions past the retention window. A session that is still
/// active or processing is never purged, and neither is one that still
/// owns a live stream; both are skipped with a warning until they settle.
async fn sweep_stale_sessions(inner: &Arc<Inner>) -> usize {
    let cutoff = Utc::now() - chrono::Duration::seconds(inner.config.session_retention_secs as i64);
    let candidates: Vec<(Uuid, SessionStatus, Vec<String>)> = {
        let sessions = inner.sessions.read().await;
        sessions
            .values()
            .filter(|session| session.submitted_at < cutoff)
            .map(|session| (session.id, session.status, session.stream_ids.clone()))
            .collect()
    };

    let mut purged = 0usize;
    for (session_id, status, stream_ids) in candidates {
        if !status.is_terminal() {
            warn!(
                session_id = %session_id,
                status = %status,
                "session past retention but still live, skipping sweep"
            );
            continue;
        }
        let mut live_stream = false;
        for stream_id in &stream_ids {
            if let Some(state) = inner.streams.stream_state(stream_id).await {
                if !state.is_terminal() {
                    live_stream = true;
                }
            }
        }
        if live_stream {
            warn!(
                session_id = %session_id,
                "session owns a live stream, skipping sweep until it stops"
            );
            continue;
        }
        for stream_id in &stream_ids {
            if inner.streams.stream_state(stream_id).await.is_some() {
                let _ = inner.streams.remove_stream(stream_id).await;
            }
        }
        let mut sessions = inner.sessions.write().await;
        if sessions.remove(&session_id).is_some() {
            purged += 1;
        }
    }
    purged
}

async fn control_loop(
    inner: Arc<Inner>,
    mut control_rx: mpsc::Receiver<ControlCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            command = control_rx.recv() => match command {
                Some(ControlCommand::CreateStream(config)) => {
                    if let Err(err) = inner.streams.create_stream(config).await {
                        warn!(error = %err, "control: create_stream failed");
                    }
                }
                Some(ControlCommand::StartStream { stream_id, reply }) => {
                    let result = inner.streams.start_stream(&stream_id).await;
                    if let Err(err) = &result {
                        warn!(stream_id = %stream_id, error = %err, "control: start_stream failed");
                    }
                    let _ = reply.send(result);
                }
                Some(ControlCommand::StopStream { stream_id }) => {
                    if let Err(err) = inner.streams.stop_stream(&stream_id).await {
                        warn!(stream_id = %stream_id, error = %err, "control: stop_stream failed");
                    }
                }
                None => break,
            },
        }
    }
}

// === session execution ===

async fn run_session(
    inner: Arc<Inner>,
    session_id: Uuid,
    mode: ProcessingMode,
    source: RequestSource,
    rule_ids: Option<Vec<String>>,
    threshold: f64,
) {
    let result = drive_session(&inner, session_id, mode, source, rule_ids, threshold).await;

    let mut sessions = inner.sessions.write().await;
    if let Some(session) = sessions.get_mut(&session_id) {
        session.ended_at = Some(Utc::now());
        match result {
            Ok(()) => {
                session.status = SessionStatus::Completed;
                info!(session_id = %session_id, "session completed");
                inner.events.publish(
                    EventKind::SessionCompleted,
                    json!({ "session_id": session_id, "result_count": session.result_count }),
                );
            }
            Err(err) => {
                session.status = SessionStatus::Failed;
                session.errors.push(err.to_string());
                warn!(session_id = %session_id, error = %err, "session failed");
                inner.events.publish(
                    EventKind::SessionFailed,
                    json!({ "session_id": session_id, "error": err.to_string() }),
                );
            }
        }
    }
}

async fn drive_session(
    inner: &Arc<Inner>,
    session_id: Uuid,
    mode: ProcessingMode,
    source: RequestSource,
    rule_ids: Option<Vec<String>>,
    threshold: f64,
) -> Result<()> {
    let records = materialize(inner, session_id, source).await?;
    match mode {
        ProcessingMode::Batch => {
            run_batch(inner, session_id, &records, rule_ids.as_deref(), threshold).await
        }
        ProcessingMode::Streaming => {
            run_streaming(inner, session_id, records, rule_ids, threshold, false).await
        }
        ProcessingMode::RealTime => {
            run_streaming(inner, session_id, records, rule_ids, threshold, true).await
        }
        ProcessingMode::Hybrid => {
            // Batch first for an immediate report, then a follow-up stream
            // over the same logical source for ongoing updates.
            run_batch(inner, session_id, &records, rule_ids.as_deref(), threshold).await?;
            run_streaming(inner, session_id, records, rule_ids, threshold, false).await
        }
    }
}

/// Turn the request source into normalized records. Only a source-level
/// fatal error (unreadable container, unknown format) propagates.
async fn materialize(
    inner: &Arc<Inner>,
    session_id: Uuid,
    source: RequestSource,
) -> Result<Vec<Record>> {
    match source {
        RequestSource::File(bytes) => {
            let outcome = inner.ingestor.ingest(&bytes)?;
            with_session(inner, session_id, |session| {
                session
                    .metrics
                    .insert("ingest_failed_rows".into(), outcome.failed_rows as f64);
                if outcome.previously_processed {
                    session.metrics.insert("previously_processed".into(), 1.0);
                }
                for warning in &outcome.warnings {
                    session.errors.push(warning.clone());
                }
            })
            .await;
            Ok(outcome.records)
        }
        RequestSource::Records(mut records) => {
            for record in &mut records {
                normalize_record(record);
            }
            Ok(records)
        }
    }
}

async fn run_batch(
    inner: &Arc<Inner>,
    session_id: Uuid,
    records: &[Record],
    rule_ids: Option<&[String]>,
    threshold: f64,
) -> Result<()> {
    let dataset_id = format!("session-{session_id}");
    let report = inner
        .engine
        .validate_dataset(records, &dataset_id, rule_ids)
        .await?;

    let insights = match inner.insight.annotate(session_id, &report).await {
        Ok(insights) => insights,
        Err(err) => {
            debug!(session_id = %session_id, error = %err, "insight bridge failed, ignoring");
            Vec::new()
        }
    };

    let below_threshold = !report.passes(threshold);
    let score = report.overall_score;
    with_session(inner, session_id, |session| {
        session.result_count += records.len();
        session
            .metrics
            .insert("overall_score".into(), report.overall_score);
        session
            .metrics
            .insert("issues_total".into(), report.issue_count() as f64);
        session.reports.push(report);
        session.insights.extend(insights);
        if below_threshold {
            // A session-level warning: the results are kept, the score is
            // simply not good enough.
            session.errors.push(
                BedekError::QualityThreshold { score, threshold }.to_string(),
            );
        }
    })
    .await;

    if below_threshold {
        warn!(
            session_id = %session_id,
            score = format!("{score:.3}"),
            threshold = format!("{threshold:.3}"),
            "dataset scored below the requested quality threshold"
        );
    }
    Ok(())
}

async fn run_streaming(
    inner: &Arc<Inner>,
    session_id: Uuid,
    records: Vec<Record>,
    rule_ids: Option<Vec<String>>,
    threshold: f64,
    realtime: bool,
) -> Result<()> {
    let stream_id = if realtime {
        format!("session-{session_id}-rt")
    } else {
        format!("session-{session_id}-stream")
    };
    let mut config = if realtime {
        StreamConfig::realtime(&stream_id)
    } else {
        StreamConfig::new(&stream_id).with_batch_size(inner.config.default_batch_size)
    };
    config = config
        .with_max_concurrent_batches(inner.config.default_max_concurrent_batches)
        .with_quality_threshold(threshold)
        .with_retries(inner.config.retry_attempts, inner.config.retry_delay_ms);
    if let Some(ids) = rule_ids {
        config = config.with_rule_ids(ids);
    }

    inner.streams.create_stream(config).await?;
    let tx = inner.streams.start_stream(&stream_id).await?;
    with_session(inner, session_id, |session| {
        session.stream_ids.push(stream_id.clone());
    })
    .await;

    for record in records {
        // A send error means the stream went terminal early; the poll
        // below picks up whatever state it reached.
        if tx.send(record).await.is_err() {
            break;
        }
    }
    drop(tx);

    // Bounded poll for a terminal state. Expiry is not a session failure:
    // proceed with whatever metrics the stream has so far.
    let poll_timeout = Duration::from_secs(if realtime {
        REALTIME_POLL_TIMEOUT_SECS
    } else {
        inner.config.poll_timeout_secs
    });
    let deadline = Instant::now() + poll_timeout;
    let mut timed_out = false;
    loop {
        match inner.streams.stream_state(&stream_id).await {
            Some(state) if state.is_terminal() => break,
            None => break,
            Some(_) if Instant::now() >= deadline => {
                timed_out = true;
                warn!(
                    session_id = %session_id,
                    stream_id = %stream_id,
                    "stream status poll timed out, proceeding with partial metrics"
                );
                break;
            }
            Some(_) => tokio::time::sleep(POLL_TICK).await,
        }
    }

    let state = inner.streams.stream_state(&stream_id).await;
    let metrics = inner.streams.stream_metrics(&stream_id).await;
    with_session(inner, session_id, |session| {
        if timed_out {
            session.metrics.insert("poll_timed_out".into(), 1.0);
        }
        if let Some(m) = metrics {
            session.result_count += m.processed_records as usize;
            session
                .metrics
                .insert("stream_total".into(), m.total_records as f64);
            session
                .metrics
                .insert("stream_processed".into(), m.processed_records as f64);
            session
                .metrics
                .insert("stream_failed".into(), m.failed_records as f64);
            session
                .metrics
                .insert("stream_filtered".into(), m.filtered_records as f64);
            session.metrics.insert("throughput".into(), m.throughput);
            for error in m.recent_errors() {
                session.errors.push(error);
            }
        }
        if state == Some(StreamState::Error) {
            // The stream died but the session survives with partial state.
            session
                .errors
                .push(format!("stream '{stream_id}' ended in error state"));
        }
    })
    .await;
    Ok(())
}
