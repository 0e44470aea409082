//! Rule-based quality validation for inspection records.
//!
//! A [`QualityEngine`] holds a registry of [`ValidationRule`]s, runs the
//! enabled ones over a dataset, and turns the findings into a scored
//! [`QualityReport`] with per-category scores, severity counts, and
//! remediation recommendations. A broken rule is contained: it becomes one
//! synthetic issue and the rest of the pass continues.
//!
//! Reports are cached with bounded per-dataset history and a TTL; a rolling
//! trend series feeds dashboards.

mod checks;

pub mod engine;
pub mod issue;
pub mod report;
pub mod rule;
pub mod score;

pub use engine::{QualityEngine, QualityEngineConfig};
pub use issue::ValidationIssue;
pub use report::{QualityReport, ReportCache, ReportCacheConfig, TrendPoint};
pub use rule::{RuleCategory, RuleKind, Severity, ValidationRule};
