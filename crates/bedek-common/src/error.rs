//! Error types for the bedek pipeline

use thiserror::Error;

/// Result type alias for bedek operations
pub type Result<T> = std::result::Result<T, BedekError>;

/// Main error type for the bedek pipeline.
///
/// Failures are contained at the smallest meaningful scope: a bad record
/// never kills a batch, a bad batch never kills a stream, a bad stream never
/// kills a session. The variants encode which scope an error belongs to so
/// callers can apply that policy mechanically.
#[derive(Error, Debug)]
pub enum BedekError {
    /// Source-level, fatal: the format of a source could not be established.
    #[error("format detection failed: {0}")]
    FormatDetection(String),

    /// Row-level, non-fatal: one row could not be decoded. Counted and
    /// skipped by the caller; the rest of the source continues.
    #[error("failed to decode row {row}: {message}")]
    Decode { row: usize, message: String },

    /// Source-level, fatal: the container itself is unreadable.
    #[error("unreadable source: {0}")]
    UnreadableSource(String),

    /// Rule-level, non-fatal: one validation rule blew up. Downgraded to a
    /// synthetic issue by the quality engine.
    #[error("rule '{rule_id}' failed to execute: {message}")]
    RuleExecution { rule_id: String, message: String },

    /// Session-level warning: a dataset scored below the requested quality
    /// threshold. Results are kept.
    #[error("quality score {score:.3} below threshold {threshold:.3}")]
    QualityThreshold { score: f64, threshold: f64 },

    /// Stream-level, non-fatal: a dispatched batch failed. Counted against
    /// stream failure metrics; the stream continues.
    #[error("batch dispatch failed: {0}")]
    BatchDispatch(String),

    /// Terminates a single stream, never its siblings.
    #[error("stream fatal error: {0}")]
    StreamFatal(String),

    /// Terminates a single session, never its siblings or the queue.
    #[error("session failed: {0}")]
    SessionFailure(String),

    /// A stream or session id that does not exist (or no longer exists).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration or request parameters.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BedekError {
    /// Whether the error is fatal for its whole source (as opposed to a
    /// contained per-row / per-rule / per-batch failure).
    pub fn is_source_fatal(&self) -> bool {
        matches!(
            self,
            BedekError::FormatDetection(_) | BedekError::UnreadableSource(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_fatal_classification() {
        assert!(BedekError::FormatDetection("no extension".into()).is_source_fatal());
        assert!(BedekError::UnreadableSource("bad zip".into()).is_source_fatal());
        assert!(!BedekError::Decode {
            row: 3,
            message: "ragged row".into()
        }
        .is_source_fatal());
        assert!(!BedekError::BatchDispatch("timeout".into()).is_source_fatal());
    }

    #[test]
    fn test_error_messages_name_the_scope() {
        let err = BedekError::RuleExecution {
            rule_id: "format.date_fields".into(),
            message: "bad params".into(),
        };
        assert!(err.to_string().contains("format.date_fields"));

        let err = BedekError::QualityThreshold {
            score: 0.6,
            threshold: 0.95,
        };
        assert!(err.to_string().contains("0.600"));
        assert!(err.to_string().contains("0.950"));
    }
}
