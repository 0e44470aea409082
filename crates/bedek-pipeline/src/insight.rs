//! Optional insight capability.
//!
//! Deployments with an external analysis service wire a full
//! implementation; everyone else gets [`NoopInsightBridge`]. The choice is
//! made once, at construction, so call sites never check for availability.

use async_trait::async_trait;
use uuid::Uuid;

use bedek_quality::QualityReport;

/// Annotates completed sessions' reports with external analysis.
///
/// Failures are logged and discarded by the caller; insight is additive
/// and must never affect session outcome.
#[async_trait]
pub trait InsightBridge: Send + Sync {
    async fn annotate(&self, session_id: Uuid, report: &QualityReport)
        -> anyhow::Result<Vec<String>>;
}

/// The degraded implementation: no annotations, never fails.
pub struct NoopInsightBridge;

#[async_trait]
impl InsightBridge for NoopInsightBridge {
    async fn annotate(
        &self,
        _session_id: Uuid,
        _report: &QualityReport,
    ) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}
