//! The quality engine: rule registry, execution, scoring, report cache.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bedek_common::{BedekError, Record, Result};

use crate::checks::run_check;
use crate::issue::ValidationIssue;
use crate::report::{QualityReport, ReportCache, ReportCacheConfig};
use crate::rule::{RuleCategory, RuleKind, Severity, ValidationRule};
use crate::score;

/// Field wiring for the built-in rule set. Defaults match the inspection
/// record layout; deployments with different column names override these
/// at construction.
#[derive(Debug, Clone)]
pub struct QualityEngineConfig {
    pub required_fields: Vec<String>,
    pub max_field_length: usize,
    /// Fields expected to carry Hebrew text.
    pub hebrew_fields: Vec<String>,
    /// Fields expected to hold person names.
    pub name_fields: Vec<String>,
    pub date_fields: Vec<String>,
    pub boolean_fields: Vec<String>,
    /// Cross-field ordering: execution must not exceed target.
    pub execution_date_field: String,
    pub target_date_field: String,
    /// Flag/date pair that must agree.
    pub distributed_flag_field: String,
    pub distribution_date_field: String,
    pub completeness_min_ratio: f64,
    pub mixed_script_dominance: f64,
    /// Business key for duplicate detection. Empty means whole-record.
    pub business_key_fields: Vec<String>,
    pub cache: ReportCacheConfig,
}

impl Default for QualityEngineConfig {
    fn default() -> Self {
        Self {
            required_fields: vec!["building_id".into(), "inspection_date".into()],
            max_field_length: 500,
            hebrew_fields: vec!["address".into(), "findings".into()],
            name_fields: vec!["inspector_name".into()],
            date_fields: vec![
                "inspection_date".into(),
                "execution_date".into(),
                "target_date".into(),
                "distribution_date".into(),
            ],
            boolean_fields: vec!["distributed".into()],
            execution_date_field: "execution_date".into(),
            target_date_field: "target_date".into(),
            distributed_flag_field: "distributed".into(),
            distribution_date_field: "distribution_date".into(),
            completeness_min_ratio: 0.8,
            mixed_script_dominance: 0.8,
            business_key_fields: vec!["building_id".into(), "inspection_date".into()],
            cache: ReportCacheConfig::default(),
        }
    }
}

/// Executes validation rules over datasets and produces [`QualityReport`]s.
///
/// The registry is the one shared table this crate owns; it sits behind an
/// async lock so the engine stays correct even off the single-threaded
/// runtime the pipeline normally runs on.
pub struct QualityEngine {
    rules: RwLock<BTreeMap<String, ValidationRule>>,
    cache: Arc<ReportCache>,
}

impl QualityEngine {
    /// Build an engine with the built-in rule set registered and enabled.
    pub fn new(config: QualityEngineConfig) -> Self {
        let mut rules = BTreeMap::new();
        for rule in builtin_rules(&config) {
            rules.insert(rule.id.clone(), rule);
        }
        Self {
            rules: RwLock::new(rules),
            cache: Arc::new(ReportCache::new(config.cache)),
        }
    }

    /// Register a rule. Rule identity is immutable once registered, so a
    /// duplicate id is rejected rather than overwritten.
    pub async fn register_rule(&self, rule: ValidationRule) -> Result<()> {
        if rule.id.trim().is_empty() {
            return Err(BedekError::Config("rule id must not be empty".into()));
        }
        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.id) {
            return Err(BedekError::Config(format!(
                "rule '{}' is already registered",
                rule.id
            )));
        }
        debug!(rule_id = %rule.id, category = %rule.category, "rule registered");
        rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    pub async fn unregister_rule(&self, id: &str) -> Result<()> {
        let mut rules = self.rules.write().await;
        rules
            .remove(id)
            .map(|_| debug!(rule_id = %id, "rule unregistered"))
            .ok_or_else(|| BedekError::NotFound(format!("rule '{id}'")))
    }

    /// Registered rules, optionally narrowed to one category, in id order.
    pub async fn list_rules(&self, category: Option<RuleCategory>) -> Vec<ValidationRule> {
        let rules = self.rules.read().await;
        rules
            .values()
            .filter(|rule| category.map_or(true, |c| rule.category == c))
            .cloned()
            .collect()
    }

    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(id)
            .ok_or_else(|| BedekError::NotFound(format!("rule '{id}'")))?;
        rule.enabled = enabled;
        Ok(())
    }

    pub fn cache(&self) -> &ReportCache {
        &self.cache
    }

    /// Run the enabled rules (or the caller's explicit selection, which
    /// overrides the enabled flag) over a dataset and produce a report.
    ///
    /// A rule that fails to execute is downgraded to one synthetic
    /// ERROR-severity issue and never stops the remaining rules. The
    /// finished report is stored in the cache before it is returned.
    ///
    /// An explicit selection naming an id with no registered rule is an
    /// error. Running nothing and reporting a perfect score would hide
    /// the caller's typo, so every requested id must exist.
    pub async fn validate_dataset(
        &self,
        records: &[Record],
        dataset_id: &str,
        rule_ids: Option<&[String]>,
    ) -> Result<QualityReport> {
        let selected: Vec<ValidationRule> = {
            let rules = self.rules.read().await;
            match rule_ids {
                Some(ids) => {
                    let missing: Vec<&str> = ids
                        .iter()
                        .map(String::as_str)
                        .filter(|id| !rules.contains_key(*id))
                        .collect();
                    if !missing.is_empty() {
                        return Err(BedekError::NotFound(format!(
                            "validation rules: {}",
                            missing.join(", ")
                        )));
                    }
                    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
                    rules
                        .values()
                        .filter(|rule| wanted.contains(rule.id.as_str()))
                        .cloned()
                        .collect()
                }
                None => rules.values().filter(|rule| rule.enabled).cloned().collect(),
            }
        };

        Ok(self.execute(selected, records, dataset_id))
    }

    fn execute(
        &self,
        selected: Vec<ValidationRule>,
        records: &[Record],
        dataset_id: &str,
    ) -> QualityReport {
        let started = Instant::now();
        let mut issues = Vec::new();
        let mut failed_rules = 0usize;
        for rule in &selected {
            match run_check(rule, records) {
                Ok(mut found) => issues.append(&mut found),
                Err(err) => {
                    failed_rules += 1;
                    warn!(rule_id = %rule.id, error = %err, "rule execution failed");
                    issues.push(synthetic_issue(rule, &err));
                }
            }
        }

        let active: BTreeSet<RuleCategory> = selected.iter().map(|rule| rule.category).collect();
        let category_scores = score::category_scores(&issues, records.len(), &active);
        let overall_score = score::overall_score(&category_scores);
        let severity_counts = score::severity_counts(&issues);
        let recommendations = score::recommendations(&category_scores, &issues);

        let flagged: HashSet<usize> = issues.iter().filter_map(|i| i.record_index).collect();
        let valid_records = records.len() - flagged.len();

        let mut metrics = BTreeMap::new();
        metrics.insert("rules_executed".into(), selected.len() as f64);
        metrics.insert("rules_failed".into(), failed_rules as f64);
        metrics.insert("issues_total".into(), issues.len() as f64);
        metrics.insert(
            "duration_ms".into(),
            started.elapsed().as_secs_f64() * 1000.0,
        );

        let report = QualityReport {
            report_id: Uuid::new_v4(),
            dataset_id: dataset_id.to_string(),
            total_records: records.len(),
            valid_records,
            generated_at: Utc::now(),
            overall_score,
            category_scores,
            severity_counts,
            issues,
            metrics,
            recommendations,
        };

        self.cache.store(&report);
        info!(
            dataset_id,
            records = report.total_records,
            issues = report.issue_count(),
            score = format!("{:.3}", report.overall_score),
            "dataset validated"
        );
        report
    }

    /// Validate one record: a single-record dataset run. Dataset-level
    /// rules (duplicates, completeness) run but have nothing to compare
    /// against, so only per-record findings come back.
    pub async fn validate_record(&self, record: &Record) -> Vec<ValidationIssue> {
        let selected: Vec<ValidationRule> = {
            let rules = self.rules.read().await;
            rules.values().filter(|rule| rule.enabled).cloned().collect()
        };
        self.execute(selected, std::slice::from_ref(record), "single-record")
            .issues
    }
}

/// The synthetic issue a broken rule leaves behind. Always ERROR severity
/// regardless of what the rule would have reported.
fn synthetic_issue(rule: &ValidationRule, err: &BedekError) -> ValidationIssue {
    let mut issue = ValidationIssue::new(rule, format!("rule failed to execute: {err}"));
    issue.severity = Severity::Error;
    issue
}

fn builtin_rules(config: &QualityEngineConfig) -> Vec<ValidationRule> {
    vec![
        ValidationRule::new(
            "schema.required_fields",
            "Required fields present",
            RuleCategory::Schema,
            Severity::Error,
            RuleKind::RequiredFields {
                fields: config.required_fields.clone(),
            },
        ),
        ValidationRule::new(
            "schema.max_field_length",
            "Field length limit",
            RuleCategory::Schema,
            Severity::Warning,
            RuleKind::MaxFieldLength {
                max_chars: config.max_field_length,
                fields: None,
            },
        ),
        ValidationRule::new(
            "hebrew.script_presence",
            "Hebrew script present and readable",
            RuleCategory::HebrewText,
            Severity::Warning,
            RuleKind::HebrewScriptPresence {
                fields: config.hebrew_fields.clone(),
            },
        ),
        ValidationRule::new(
            "hebrew.name_charset",
            "Name fields use naming characters",
            RuleCategory::HebrewText,
            Severity::Warning,
            RuleKind::HebrewNameCharset {
                fields: config.name_fields.clone(),
            },
        ),
        ValidationRule::new(
            "hebrew.mixed_script_ratio",
            "No script-soup fields",
            RuleCategory::HebrewText,
            Severity::Info,
            RuleKind::MixedScriptRatio {
                dominance: config.mixed_script_dominance,
            },
        ),
        ValidationRule::new(
            "format.date_fields",
            "Date fields are ISO dates",
            RuleCategory::DataFormat,
            Severity::Error,
            RuleKind::DateFields {
                fields: config.date_fields.clone(),
            },
        ),
        ValidationRule::new(
            "format.boolean_fields",
            "Boolean fields are recognizable",
            RuleCategory::DataFormat,
            Severity::Warning,
            RuleKind::BooleanFields {
                fields: config.boolean_fields.clone(),
            },
        ),
        ValidationRule::new(
            "logic.date_ordering",
            "Execution date within target",
            RuleCategory::BusinessLogic,
            Severity::Error,
            RuleKind::DateOrdering {
                earlier: config.execution_date_field.clone(),
                later: config.target_date_field.clone(),
            },
        ),
        ValidationRule::new(
            "consistency.status_fields",
            "Distribution flag matches its date",
            RuleCategory::Consistency,
            Severity::Warning,
            RuleKind::StatusConsistency {
                flag_field: config.distributed_flag_field.clone(),
                date_field: config.distribution_date_field.clone(),
            },
        ),
        ValidationRule::new(
            "completeness.field_ratio",
            "Dataset completeness",
            RuleCategory::Completeness,
            Severity::Warning,
            RuleKind::CompletenessRatio {
                min_ratio: config.completeness_min_ratio,
            },
        ),
        ValidationRule::new(
            "uniqueness.duplicate_records",
            "No duplicate inspections",
            RuleCategory::Uniqueness,
            Severity::Error,
            RuleKind::DuplicateRecords {
                key_fields: config.business_key_fields.clone(),
            },
        ),
    ]
}
