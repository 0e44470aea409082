//! Processing requests and the sessions that track them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bedek_common::{BedekError, Record, Result};
use bedek_ingest::ByteSource;
use bedek_quality::QualityReport;

use crate::config::DEFAULT_QUALITY_THRESHOLD;

/// How a session's source is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Whole source at once, one report.
    Batch,
    /// Through a stream with batching and backpressure.
    Streaming,
    /// Streaming with tighter batch sizes and timeouts.
    RealTime,
    /// Batch first for an immediate report, then a follow-up stream.
    Hybrid,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Batch => "batch",
            ProcessingMode::Streaming => "streaming",
            ProcessingMode::RealTime => "real_time",
            ProcessingMode::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the request carries. Consumed once, when the session is dispatched.
#[derive(Debug, Clone)]
pub enum RequestSource {
    /// A raw file from the upload collaborator.
    File(ByteSource),
    /// Already-structured records from an API-import or webhook collaborator.
    Records(Vec<Record>),
}

impl RequestSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            RequestSource::File(_) => SourceKind::File,
            RequestSource::Records(_) => SourceKind::Records,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    Records,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Records => "records",
        }
    }
}

/// One submission to the orchestrator.
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    pub source: RequestSource,
    pub mode: ProcessingMode,
    /// Validation-rule subset; `None` runs every enabled rule.
    pub rule_ids: Option<Vec<String>>,
    pub quality_threshold: f64,
    /// Lower value is served first.
    pub priority: u8,
}

impl ProcessingRequest {
    pub fn new(source: RequestSource, mode: ProcessingMode) -> Self {
        Self {
            source,
            mode,
            rule_ids: None,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            priority: 100,
        }
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rule_ids(mut self, rule_ids: Vec<String>) -> Self {
        self.rule_ids = Some(rule_ids);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(BedekError::Config(format!(
                "quality_threshold must be within [0, 1], got {}",
                self.quality_threshold
            )));
        }
        if let RequestSource::File(source) = &self.source {
            if source.is_empty() {
                return Err(BedekError::Config("file source is empty".into()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Submitted and queued.
    Active,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The orchestrator's tracking object for one request. Private to the
/// orchestrator; status queries see a [`SessionStatusSnapshot`].
#[derive(Debug)]
pub struct ProcessingSession {
    pub id: Uuid,
    pub mode: ProcessingMode,
    pub source_kind: SourceKind,
    pub rule_ids: Option<Vec<String>>,
    pub quality_threshold: f64,
    pub priority: u8,
    pub status: SessionStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Records produced so far.
    pub result_count: usize,
    pub reports: Vec<QualityReport>,
    pub stream_ids: Vec<String>,
    pub errors: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    /// Annotations from the insight capability, when one is wired.
    pub insights: Vec<String>,
    /// The unconsumed source; taken at dispatch.
    pub source: Option<RequestSource>,
}

impl ProcessingSession {
    pub fn new(request: ProcessingRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode: request.mode,
            source_kind: request.source.kind(),
            rule_ids: request.rule_ids,
            quality_threshold: request.quality_threshold,
            priority: request.priority,
            status: SessionStatus::Active,
            submitted_at: Utc::now(),
            started_at: None,
            ended_at: None,
            result_count: 0,
            reports: Vec::new(),
            stream_ids: Vec::new(),
            errors: Vec::new(),
            metrics: BTreeMap::new(),
            insights: Vec::new(),
            source: Some(request.source),
        }
    }

    pub fn snapshot(&self) -> SessionStatusSnapshot {
        SessionStatusSnapshot {
            session_id: self.id,
            status: self.status,
            mode: self.mode,
            source_kind: self.source_kind,
            result_count: self.result_count,
            quality_report_count: self.reports.len(),
            stream_ids: self.stream_ids.clone(),
            recent_errors: self.errors.iter().rev().take(10).rev().cloned().collect(),
            metrics: self.metrics.clone(),
        }
    }
}

/// The polling status object exposed to collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusSnapshot {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub mode: ProcessingMode,
    pub source_kind: SourceKind,
    pub result_count: usize,
    pub quality_report_count: usize,
    pub stream_ids: Vec<String>,
    pub recent_errors: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedek_common::FieldValue;

    fn records_request() -> ProcessingRequest {
        ProcessingRequest::new(
            RequestSource::Records(vec![Record::from_pairs([(
                "building_id",
                FieldValue::from("B-1"),
            )])]),
            ProcessingMode::Batch,
        )
    }

    #[test]
    fn test_new_session_is_active_with_source() {
        let session = ProcessingSession::new(records_request());
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.source.is_some());
        assert_eq!(session.source_kind, SourceKind::Records);
        assert_eq!(session.quality_threshold, DEFAULT_QUALITY_THRESHOLD);
    }

    #[test]
    fn test_request_validation() {
        assert!(records_request().validate().is_ok());
        assert!(records_request()
            .with_quality_threshold(1.5)
            .validate()
            .is_err());
        let empty_file = ProcessingRequest::new(
            RequestSource::File(ByteSource::from_bytes(vec![])),
            ProcessingMode::Batch,
        );
        assert!(empty_file.validate().is_err());
    }

    #[test]
    fn test_snapshot_bounds_recent_errors() {
        let mut session = ProcessingSession::new(records_request());
        for i in 0..15 {
            session.errors.push(format!("error {i}"));
        }
        let snapshot = session.snapshot();
        assert_eq!(snapshot.recent_errors.len(), 10);
        assert_eq!(snapshot.recent_errors[0], "error 5");
        assert_eq!(snapshot.recent_errors[9], "error 14");
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let session = ProcessingSession::new(records_request());
        let value = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(value["status"], "active");
        assert_eq!(value["mode"], "batch");
        assert_eq!(value["source_kind"], "records");
        assert_eq!(value["quality_report_count"], 0);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Processing.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
    }
}
