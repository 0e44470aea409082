//! Quality reports and their bounded cache.
//!
//! A [`QualityReport`] is immutable once generated. The [`ReportCache`]
//! keeps the most recent reports per dataset under a TTL, plus a rolling
//! trend series for dashboarding; these are the only writes the quality
//! engine performs outside its own registry.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::issue::ValidationIssue;
use crate::rule::{RuleCategory, Severity};

/// The result of one validation pass over one dataset.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub report_id: Uuid,
    pub dataset_id: String,
    pub total_records: usize,
    /// Records no issue pointed at. Dataset-level issues (no record index)
    /// do not disqualify individual records.
    pub valid_records: usize,
    pub generated_at: DateTime<Utc>,
    /// Mean of the category scores, in [0,1].
    pub overall_score: f64,
    pub category_scores: BTreeMap<RuleCategory, f64>,
    pub severity_counts: BTreeMap<Severity, usize>,
    /// Issues in rule-execution order.
    pub issues: Vec<ValidationIssue>,
    pub metrics: BTreeMap<String, f64>,
    pub recommendations: Vec<String>,
}

impl QualityReport {
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    pub fn passes(&self, threshold: f64) -> bool {
        self.overall_score >= threshold
    }

    /// Issues of one severity, preserving order.
    pub fn issues_with_severity(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }
}

/// One point in a dataset's quality-over-time series.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub overall_score: f64,
}

#[derive(Debug, Clone)]
pub struct ReportCacheConfig {
    /// Most-recent reports retained per dataset.
    pub history_per_dataset: usize,
    /// Reports older than this are evicted.
    pub ttl: Duration,
    /// Trend points retained per dataset.
    pub trend_capacity: usize,
}

impl Default for ReportCacheConfig {
    fn default() -> Self {
        Self {
            history_per_dataset: 10,
            ttl: Duration::hours(24),
            trend_capacity: 288,
        }
    }
}

/// Bounded, TTL-evicting store of recent reports keyed by dataset id.
pub struct ReportCache {
    config: ReportCacheConfig,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    reports: HashMap<String, VecDeque<QualityReport>>,
    trends: HashMap<String, VecDeque<TrendPoint>>,
}

impl ReportCache {
    pub fn new(config: ReportCacheConfig) -> Self {
        Self {
            config: ReportCacheConfig {
                history_per_dataset: config.history_per_dataset.max(1),
                trend_capacity: config.trend_capacity.max(1),
                ..config
            },
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Store a report and extend the dataset's trend series.
    pub fn store(&self, report: &QualityReport) {
        let mut inner = self.lock();

        let history = inner.reports.entry(report.dataset_id.clone()).or_default();
        history.push_back(report.clone());
        while history.len() > self.config.history_per_dataset {
            history.pop_front();
        }

        let trend = inner.trends.entry(report.dataset_id.clone()).or_default();
        trend.push_back(TrendPoint {
            timestamp: report.generated_at,
            overall_score: report.overall_score,
        });
        while trend.len() > self.config.trend_capacity {
            trend.pop_front();
        }
    }

    /// The newest unexpired report for a dataset.
    pub fn latest(&self, dataset_id: &str) -> Option<QualityReport> {
        let mut inner = self.lock();
        self.evict_expired(&mut inner, dataset_id);
        inner
            .reports
            .get(dataset_id)
            .and_then(|history| history.back().cloned())
    }

    /// Unexpired reports for a dataset, oldest first.
    pub fn history(&self, dataset_id: &str) -> Vec<QualityReport> {
        let mut inner = self.lock();
        self.evict_expired(&mut inner, dataset_id);
        inner
            .reports
            .get(dataset_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The dataset's score-over-time series, oldest first. Trend points
    /// outlive their reports; only capacity bounds them.
    pub fn trend(&self, dataset_id: &str) -> Vec<TrendPoint> {
        let inner = self.lock();
        inner
            .trends
            .get(dataset_id)
            .map(|trend| trend.iter().copied().collect())
            .unwrap_or_default()
    }

    fn evict_expired(&self, inner: &mut CacheInner, dataset_id: &str) {
        let cutoff = Utc::now() - self.config.ttl;
        if let Some(history) = inner.reports.get_mut(dataset_id) {
            history.retain(|report| report.generated_at > cutoff);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ReportCache {
    fn default() -> Self {
        Self::new(ReportCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(dataset_id: &str, score: f64, age: Duration) -> QualityReport {
        QualityReport {
            report_id: Uuid::new_v4(),
            dataset_id: dataset_id.to_string(),
            total_records: 10,
            valid_records: 9,
            generated_at: Utc::now() - age,
            overall_score: score,
            category_scores: BTreeMap::new(),
            severity_counts: BTreeMap::new(),
            issues: Vec::new(),
            metrics: BTreeMap::new(),
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn test_history_is_bounded_most_recent() {
        let cache = ReportCache::new(ReportCacheConfig {
            history_per_dataset: 3,
            ..ReportCacheConfig::default()
        });
        for i in 0..5 {
            cache.store(&report("permits", i as f64 / 10.0, Duration::zero()));
        }
        let history = cache.history("permits");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].overall_score, 0.2);
        assert_eq!(cache.latest("permits").unwrap().overall_score, 0.4);
    }

    #[test]
    fn test_ttl_eviction() {
        let cache = ReportCache::new(ReportCacheConfig {
            ttl: Duration::hours(1),
            ..ReportCacheConfig::default()
        });
        cache.store(&report("permits", 0.5, Duration::hours(2)));
        cache.store(&report("permits", 0.9, Duration::zero()));
        let history = cache.history("permits");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].overall_score, 0.9);
    }

    #[test]
    fn test_datasets_are_isolated() {
        let cache = ReportCache::default();
        cache.store(&report("a", 0.3, Duration::zero()));
        cache.store(&report("b", 0.8, Duration::zero()));
        assert_eq!(cache.latest("a").unwrap().overall_score, 0.3);
        assert_eq!(cache.latest("b").unwrap().overall_score, 0.8);
        assert!(cache.latest("c").is_none());
    }

    #[test]
    fn test_trend_accumulates_past_history_bound() {
        let cache = ReportCache::new(ReportCacheConfig {
            history_per_dataset: 2,
            ..ReportCacheConfig::default()
        });
        for i in 0..4 {
            cache.store(&report("permits", i as f64 / 10.0, Duration::zero()));
        }
        assert_eq!(cache.history("permits").len(), 2);
        let trend = cache.trend("permits");
        assert_eq!(trend.len(), 4);
        assert_eq!(trend[0].overall_score, 0.0);
        assert_eq!(trend[3].overall_score, 0.3);
    }

    #[test]
    fn test_passes_threshold() {
        let r = report("d", 0.8, Duration::zero());
        assert!(r.passes(0.8));
        assert!(!r.passes(0.81));
    }
}
