//! Validation issues: what a rule found, where, and how sure it is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rule::{RuleCategory, Severity, ValidationRule};

/// One finding from one rule execution. Append-only within a validation
/// run; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub rule_id: String,
    pub severity: Severity,
    pub category: RuleCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// 0-based index of the offending record within the validated set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// How certain the check is, in [0,1]. Heuristic checks sit below 1.0.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl ValidationIssue {
    pub fn new(rule: &ValidationRule, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            severity: rule.severity,
            category: rule.category,
            message: message.into(),
            field: None,
            record_index: None,
            actual: None,
            expected: None,
            confidence: 1.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_record_index(mut self, index: usize) -> Self {
        self.record_index = Some(index);
        self
    }

    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleKind;

    fn sample_rule() -> ValidationRule {
        ValidationRule::new(
            "schema.required_fields",
            "Required fields present",
            RuleCategory::Schema,
            Severity::Error,
            RuleKind::RequiredFields {
                fields: vec!["building_id".into()],
            },
        )
    }

    #[test]
    fn test_issue_inherits_rule_identity() {
        let issue = ValidationIssue::new(&sample_rule(), "missing required field")
            .with_field("building_id")
            .with_record_index(3);
        assert_eq!(issue.rule_id, "schema.required_fields");
        assert_eq!(issue.severity, Severity::Error);
        assert_eq!(issue.category, RuleCategory::Schema);
        assert_eq!(issue.record_index, Some(3));
        assert_eq!(issue.confidence, 1.0);
    }

    #[test]
    fn test_confidence_clamped() {
        let issue = ValidationIssue::new(&sample_rule(), "m").with_confidence(1.7);
        assert_eq!(issue.confidence, 1.0);
    }

    #[test]
    fn test_optional_fields_omitted_from_json() {
        let issue = ValidationIssue::new(&sample_rule(), "m");
        let json = serde_json::to_string(&issue).unwrap();
        assert!(!json.contains("record_index"));
        assert!(!json.contains("\"field\""));
    }
}
