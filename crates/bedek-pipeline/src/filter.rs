//! Per-record filter and transformation rules.
//!
//! Both are pure functions of a single record, applied by the stream
//! consumer before buffering: filters first, then transforms. No
//! cross-record state.

use serde::{Deserialize, Serialize};

use bedek_common::{FieldValue, Record};

/// Declarative record filters. A record must pass every configured filter
/// to be buffered; a missing field fails the filter naming it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterRule {
    Equals { field: String, value: String },
    Contains { field: String, value: String },
    MinLength { field: String, chars: usize },
    MaxLength { field: String, chars: usize },
}

impl FilterRule {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            FilterRule::Equals { field, value } => record
                .get(field)
                .map_or(false, |v| !v.is_null() && v.to_string() == *value),
            FilterRule::Contains { field, value } => record
                .get(field)
                .and_then(FieldValue::as_text)
                .map_or(false, |text| text.contains(value.as_str())),
            FilterRule::MinLength { field, chars } => record
                .get(field)
                .and_then(FieldValue::as_text)
                .map_or(false, |text| text.chars().count() >= *chars),
            FilterRule::MaxLength { field, chars } => record
                .get(field)
                .and_then(FieldValue::as_text)
                .map_or(false, |text| text.chars().count() <= *chars),
        }
    }
}

/// True when the record passes every filter. An empty list passes all.
pub fn record_passes(filters: &[FilterRule], record: &Record) -> bool {
    filters.iter().all(|filter| filter.matches(record))
}

/// Declarative text transformations applied after filtering. Non-text and
/// missing fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformRule {
    Lowercase { field: String },
    Uppercase { field: String },
    Trim { field: String },
    Replace { field: String, from: String, to: String },
}

impl TransformRule {
    fn field(&self) -> &str {
        match self {
            TransformRule::Lowercase { field }
            | TransformRule::Uppercase { field }
            | TransformRule::Trim { field }
            | TransformRule::Replace { field, .. } => field,
        }
    }

    fn apply(&self, text: &str) -> String {
        match self {
            TransformRule::Lowercase { .. } => text.to_lowercase(),
            TransformRule::Uppercase { .. } => text.to_uppercase(),
            TransformRule::Trim { .. } => text.trim().to_string(),
            TransformRule::Replace { from, to, .. } => text.replace(from.as_str(), to),
        }
    }
}

pub fn apply_transforms(transforms: &[TransformRule], record: &mut Record) {
    for transform in transforms {
        let target = transform.field();
        for (name, value) in record.iter_mut() {
            if name != target {
                continue;
            }
            if let FieldValue::Text(text) = value {
                *text = transform.apply(text);
            }
        }
    }
}
