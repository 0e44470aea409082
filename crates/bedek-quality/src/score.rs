//! Quality scoring and recommendation generation.
//!
//! Scores are computed per category from the issues a validation pass
//! produced, then averaged into one overall figure. The arithmetic is
//! deliberately simple so a report is explainable: every issue subtracts
//! its severity weight, scaled by dataset size.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::issue::ValidationIssue;
use crate::rule::{RuleCategory, Severity};

/// A category scoring below this earns a remediation recommendation.
const WEAK_CATEGORY_SCORE: f64 = 0.7;

/// A single rule responsible for more than this share of all issues earns
/// a targeted recommendation.
const DOMINANT_RULE_SHARE: f64 = 0.1;

/// Per-category score: `max(0, 1 − Σ issue_weight / total_records)`.
///
/// Every category in `active` gets an entry; one with no issues scores a
/// perfect 1.0. An empty dataset divides by one so dataset-level issues
/// (which can still fire on zero records) stay meaningful.
pub fn category_scores(
    issues: &[ValidationIssue],
    total_records: usize,
    active: &BTreeSet<RuleCategory>,
) -> BTreeMap<RuleCategory, f64> {
    let divisor = total_records.max(1) as f64;
    let mut weights: BTreeMap<RuleCategory, f64> = BTreeMap::new();
    for issue in issues {
        *weights.entry(issue.category).or_insert(0.0) += issue.severity.weight();
    }

    let mut scores = BTreeMap::new();
    for category in active {
        let weight = weights.get(category).copied().unwrap_or(0.0);
        scores.insert(*category, (1.0 - weight / divisor).max(0.0));
    }
    scores
}

/// Unweighted mean of the category scores. No active categories means
/// nothing was checked, which reads as a perfect dataset.
pub fn overall_score(scores: &BTreeMap<RuleCategory, f64>) -> f64 {
    if scores.is_empty() {
        return 1.0;
    }
    scores.values().sum::<f64>() / scores.len() as f64
}

pub fn severity_counts(issues: &[ValidationIssue]) -> BTreeMap<Severity, usize> {
    let mut counts = BTreeMap::new();
    for issue in issues {
        *counts.entry(issue.severity).or_insert(0) += 1;
    }
    counts
}

/// Remediation hints: one per weak category, one per dominant rule.
pub fn recommendations(
    scores: &BTreeMap<RuleCategory, f64>,
    issues: &[ValidationIssue],
) -> Vec<String> {
    let mut out = Vec::new();

    for (category, score) in scores {
        if *score < WEAK_CATEGORY_SCORE {
            out.push(format!(
                "{}: score {score:.2} — {}",
                category,
                category_remedy(*category)
            ));
        }
    }

    if !issues.is_empty() {
        let mut per_rule: HashMap<&str, usize> = HashMap::new();
        for issue in issues {
            *per_rule.entry(issue.rule_id.as_str()).or_insert(0) += 1;
        }
        let total = issues.len() as f64;
        let mut dominant: Vec<(&str, usize)> = per_rule
            .into_iter()
            .filter(|(_, count)| *count as f64 / total > DOMINANT_RULE_SHARE)
            .collect();
        dominant.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        for (rule_id, count) in dominant {
            out.push(format!(
                "rule `{rule_id}` produced {count} of {} issues; review the \
                 source data or the rule's configuration",
                issues.len()
            ));
        }
    }

    out
}

fn category_remedy(category: RuleCategory) -> &'static str {
    match category {
        RuleCategory::Schema => "fill the required fields before submission",
        RuleCategory::HebrewText => {
            "check the export encoding; Hebrew text arrives garbled or missing"
        }
        RuleCategory::DataFormat => "use ISO dates (YYYY-MM-DD) and recognized boolean values",
        RuleCategory::BusinessLogic => "review execution and target dates for misordered entries",
        RuleCategory::Consistency => "align status flags with their companion date fields",
        RuleCategory::Completeness => "too many empty cells; complete the inspection forms",
        RuleCategory::Accuracy => "verify flagged values against the source documents",
        RuleCategory::Uniqueness => "remove duplicate inspection entries before re-submitting",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RuleKind, ValidationRule};

    fn issue(rule_id: &str, category: RuleCategory, severity: Severity) -> ValidationIssue {
        let rule = ValidationRule::new(
            rule_id,
            "Test",
            category,
            severity,
            RuleKind::RequiredFields {
                fields: vec!["f".into()],
            },
        );
        ValidationIssue::new(&rule, "test issue")
    }

    #[test]
    fn test_category_score_subtracts_weights() {
        let issues = vec![
            issue("a", RuleCategory::Schema, Severity::Error),
            issue("a", RuleCategory::Schema, Severity::Error),
        ];
        let active = BTreeSet::from([RuleCategory::Schema, RuleCategory::Uniqueness]);
        let scores = category_scores(&issues, 10, &active);
        // 1 - (0.7 + 0.7) / 10
        assert!((scores[&RuleCategory::Schema] - 0.86).abs() < 1e-9);
        assert_eq!(scores[&RuleCategory::Uniqueness], 1.0);
    }

    #[test]
    fn test_category_score_floors_at_zero() {
        let issues: Vec<_> = (0..5)
            .map(|_| issue("a", RuleCategory::Schema, Severity::Critical))
            .collect();
        let active = BTreeSet::from([RuleCategory::Schema]);
        let scores = category_scores(&issues, 2, &active);
        assert_eq!(scores[&RuleCategory::Schema], 0.0);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        for n in [0usize, 1, 3, 100] {
            let issues: Vec<_> = (0..n)
                .map(|i| {
                    let sev = match i % 4 {
                        0 => Severity::Info,
                        1 => Severity::Warning,
                        2 => Severity::Error,
                        _ => Severity::Critical,
                    };
                    issue("r", RuleCategory::Completeness, sev)
                })
                .collect();
            let active = BTreeSet::from([RuleCategory::Completeness]);
            let scores = category_scores(&issues, 7, &active);
            let overall = overall_score(&scores);
            for score in scores.values() {
                assert!((0.0..=1.0).contains(score));
            }
            assert!((0.0..=1.0).contains(&overall));
        }
    }

    #[test]
    fn test_overall_is_mean_of_active_categories() {
        let mut scores = BTreeMap::new();
        scores.insert(RuleCategory::Schema, 0.5);
        scores.insert(RuleCategory::Uniqueness, 1.0);
        assert!((overall_score(&scores) - 0.75).abs() < 1e-9);
        assert_eq!(overall_score(&BTreeMap::new()), 1.0);
    }

    #[test]
    fn test_weak_category_recommendation() {
        let mut scores = BTreeMap::new();
        scores.insert(RuleCategory::HebrewText, 0.4);
        scores.insert(RuleCategory::Schema, 0.95);
        let recs = recommendations(&scores, &[]);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("hebrew_text"));
    }

    #[test]
    fn test_dominant_rule_recommendation() {
        let mut issues: Vec<_> = (0..9)
            .map(|i| {
                issue(
                    ["a", "b", "c", "d", "e", "f", "g", "h", "i"][i],
                    RuleCategory::Schema,
                    Severity::Info,
                )
            })
            .collect();
        for _ in 0..3 {
            issues.push(issue("hot", RuleCategory::Schema, Severity::Info));
        }
        // "hot" carries 3 of 12 issues (25%); everything else is ≤ 1/12.
        let recs = recommendations(&BTreeMap::new(), &issues);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("`hot`"));
    }

    #[test]
    fn test_severity_counts() {
        let issues = vec![
            issue("a", RuleCategory::Schema, Severity::Error),
            issue("b", RuleCategory::Schema, Severity::Error),
            issue("c", RuleCategory::Schema, Severity::Info),
        ];
        let counts = severity_counts(&issues);
        assert_eq!(counts[&Severity::Error], 2);
        assert_eq!(counts[&Severity::Info], 1);
        assert!(!counts.contains_key(&Severity::Critical));
    }
}
