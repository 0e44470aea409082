//! Validation rule model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Rule grouping by concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Schema,
    HebrewText,
    DataFormat,
    BusinessLogic,
    Consistency,
    Completeness,
    Accuracy,
    Uniqueness,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Schema => "schema",
            RuleCategory::HebrewText => "hebrew_text",
            RuleCategory::DataFormat => "data_format",
            RuleCategory::BusinessLogic => "business_logic",
            RuleCategory::Consistency => "consistency",
            RuleCategory::Completeness => "completeness",
            RuleCategory::Accuracy => "accuracy",
            RuleCategory::Uniqueness => "uniqueness",
        }
    }

    pub fn all() -> [RuleCategory; 8] {
        [
            RuleCategory::Schema,
            RuleCategory::HebrewText,
            RuleCategory::DataFormat,
            RuleCategory::BusinessLogic,
            RuleCategory::Consistency,
            RuleCategory::Completeness,
            RuleCategory::Accuracy,
            RuleCategory::Uniqueness,
        ]
    }
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue severity. Doubles as the scoring weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Fixed scoring weights: INFO 0.1, WARNING 0.3, ERROR 0.7, CRITICAL 1.0.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Info => 0.1,
            Severity::Warning => 0.3,
            Severity::Error => 0.7,
            Severity::Critical => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule actually checks. The set is closed so execution can match
/// exhaustively; new checks are new variants, not opaque callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum RuleKind {
    /// Named fields must be present and non-null on every record.
    RequiredFields { fields: Vec<String> },
    /// Text fields must not exceed a character count. `fields: None` means
    /// every text field.
    MaxFieldLength {
        max_chars: usize,
        fields: Option<Vec<String>>,
    },
    /// Named fields are expected to carry Hebrew script; flags encoding
    /// artifacts (mojibake) and Hebrew-free values.
    HebrewScriptPresence { fields: Vec<String> },
    /// Named fields must look like names: letters and naming punctuation.
    HebrewNameCharset { fields: Vec<String> },
    /// Flags text where neither Hebrew nor Latin reaches the dominance
    /// share (0.8 = the 80/20 split).
    MixedScriptRatio { dominance: f64 },
    /// Named fields must hold ISO `YYYY-MM-DD` dates.
    DateFields { fields: Vec<String> },
    /// Named fields must hold recognizable booleans.
    BooleanFields { fields: Vec<String> },
    /// `earlier` must not exceed `later` when both dates are present.
    DateOrdering { earlier: String, later: String },
    /// A truthy flag requires the date, and the date requires the flag.
    StatusConsistency {
        flag_field: String,
        date_field: String,
    },
    /// Dataset-wide filled-field ratio must reach `min_ratio`.
    CompletenessRatio { min_ratio: f64 },
    /// Exact duplicates on the business key; empty key means whole-record
    /// content.
    DuplicateRecords { key_fields: Vec<String> },
}

/// A registered validation rule. Identity (`id`) is immutable once the rule
/// is in a registry; only the enabled flag may change in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: String,
    pub name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub enabled: bool,
    /// Scoring weight of one issue from this rule. Defaults to the fixed
    /// severity weight; kept explicit so reports can show it.
    pub weight: f64,
    pub kind: RuleKind,
}

impl ValidationRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: RuleCategory,
        severity: Severity,
        kind: RuleKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            severity,
            enabled: true,
            weight: severity.weight(),
            kind,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self.weight = severity.weight();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The numeric threshold this rule runs against, where one applies.
    pub fn threshold(&self) -> Option<f64> {
        match &self.kind {
            RuleKind::MixedScriptRatio { dominance } => Some(*dominance),
            RuleKind::CompletenessRatio { min_ratio } => Some(*min_ratio),
            RuleKind::MaxFieldLength { max_chars, .. } => Some(*max_chars as f64),
            _ => None,
        }
    }

    /// Flat description of the rule's parameters for status surfaces.
    pub fn params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        match &self.kind {
            RuleKind::RequiredFields { fields }
            | RuleKind::HebrewScriptPresence { fields }
            | RuleKind::HebrewNameCharset { fields }
            | RuleKind::DateFields { fields }
            | RuleKind::BooleanFields { fields } => {
                params.insert("fields".into(), fields.join(","));
            }
            RuleKind::MaxFieldLength { max_chars, fields } => {
                params.insert("max_chars".into(), max_chars.to_string());
                if let Some(fields) = fields {
                    params.insert("fields".into(), fields.join(","));
                }
            }
            RuleKind::MixedScriptRatio { dominance } => {
                params.insert("dominance".into(), dominance.to_string());
            }
            RuleKind::DateOrdering { earlier, later } => {
                params.insert("earlier".into(), earlier.clone());
                params.insert("later".into(), later.clone());
            }
            RuleKind::StatusConsistency {
                flag_field,
                date_field,
            } => {
                params.insert("flag_field".into(), flag_field.clone());
                params.insert("date_field".into(), date_field.clone());
            }
            RuleKind::CompletenessRatio { min_ratio } => {
                params.insert("min_ratio".into(), min_ratio.to_string());
            }
            RuleKind::DuplicateRecords { key_fields } => {
                params.insert("key_fields".into(), key_fields.join(","));
            }
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_weights_are_fixed() {
        assert_eq!(Severity::Info.weight(), 0.1);
        assert_eq!(Severity::Warning.weight(), 0.3);
        assert_eq!(Severity::Error.weight(), 0.7);
        assert_eq!(Severity::Critical.weight(), 1.0);
    }

    #[test]
    fn test_rule_weight_tracks_severity() {
        let rule = ValidationRule::new(
            "test.rule",
            "Test",
            RuleCategory::Schema,
            Severity::Warning,
            RuleKind::RequiredFields {
                fields: vec!["a".into()],
            },
        );
        assert_eq!(rule.weight, 0.3);
        let rule = rule.with_severity(Severity::Critical);
        assert_eq!(rule.weight, 1.0);
    }

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&RuleCategory::HebrewText).unwrap();
        assert_eq!(json, "\"hebrew_text\"");
        let back: RuleCategory = serde_json::from_str("\"business_logic\"").unwrap();
        assert_eq!(back, RuleCategory::BusinessLogic);
    }

    #[test]
    fn test_params_flatten_kind() {
        let rule = ValidationRule::new(
            "logic.date_ordering",
            "Dates in order",
            RuleCategory::BusinessLogic,
            Severity::Error,
            RuleKind::DateOrdering {
                earlier: "execution_date".into(),
                later: "target_date".into(),
            },
        );
        let params = rule.params();
        assert_eq!(params.get("earlier").map(String::as_str), Some("execution_date"));
        assert_eq!(params.get("later").map(String::as_str), Some("target_date"));
        assert_eq!(rule.threshold(), None);
    }
}
