//! Execution of validation rules over a dataset.
//!
//! Every check is a plain function over `&[Record]`; [`run_check`] dispatches
//! on the rule kind. A misconfigured rule fails with
//! [`BedekError::RuleExecution`] so the engine can record the failure and
//! keep running the remaining rules.

use std::collections::HashMap;

use regex::Regex;

use bedek_common::hash::{business_key_hash, content_hash};
use bedek_common::{BedekError, FieldValue, Record, Result};

use crate::issue::ValidationIssue;
use crate::rule::{RuleKind, ValidationRule};

/// Fields with fewer letters than this are too short to classify by script.
const MIN_SCRIPT_LETTERS: usize = 5;

/// Letters and naming punctuation accepted in Hebrew or Latin person names.
/// Geresh and gershayim are folded to `'` and `"` by normalization.
const NAME_PATTERN: &str = r#"^[\p{Hebrew}\p{Latin} .,'"()\-]+$"#;

pub(crate) fn run_check(
    rule: &ValidationRule,
    records: &[Record],
) -> Result<Vec<ValidationIssue>> {
    match &rule.kind {
        RuleKind::RequiredFields { fields } => required_fields(rule, records, fields),
        RuleKind::MaxFieldLength { max_chars, fields } => {
            max_field_length(rule, records, *max_chars, fields.as_deref())
        }
        RuleKind::HebrewScriptPresence { fields } => hebrew_script_presence(rule, records, fields),
        RuleKind::HebrewNameCharset { fields } => hebrew_name_charset(rule, records, fields),
        RuleKind::MixedScriptRatio { dominance } => mixed_script_ratio(rule, records, *dominance),
        RuleKind::DateFields { fields } => date_fields(rule, records, fields),
        RuleKind::BooleanFields { fields } => boolean_fields(rule, records, fields),
        RuleKind::DateOrdering { earlier, later } => date_ordering(rule, records, earlier, later),
        RuleKind::StatusConsistency {
            flag_field,
            date_field,
        } => status_consistency(rule, records, flag_field, date_field),
        RuleKind::CompletenessRatio { min_ratio } => {
            completeness_ratio(rule, records, *min_ratio)
        }
        RuleKind::DuplicateRecords { key_fields } => duplicate_records(rule, records, key_fields),
    }
}

// === parameter guards ===

fn misconfigured(rule: &ValidationRule, message: impl Into<String>) -> BedekError {
    BedekError::RuleExecution {
        rule_id: rule.id.clone(),
        message: message.into(),
    }
}

fn ensure_fields(rule: &ValidationRule, fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return Err(misconfigured(rule, "no fields configured"));
    }
    Ok(())
}

fn build_regex(rule: &ValidationRule, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| misconfigured(rule, format!("bad pattern: {e}")))
}

// === script helpers ===

fn is_hebrew_letter(c: char) -> bool {
    ('\u{05d0}'..='\u{05ea}').contains(&c)
}

fn has_hebrew(text: &str) -> bool {
    text.chars().any(is_hebrew_letter)
}

/// UTF-8 Hebrew decoded through a Latin codepage shows up as runs of `×`
/// followed by stray punctuation, `â€` sequences, or replacement characters.
fn looks_like_mojibake(text: &str) -> bool {
    text.contains('\u{fffd}') || text.contains("â€") || text.matches('×').count() >= 2
}

/// True/false under the accepted spellings, including the Hebrew pair.
fn recognized_bool(value: &FieldValue) -> Option<bool> {
    match value {
        FieldValue::Bool(b) => Some(*b),
        FieldValue::Number(n) if *n == 0.0 => Some(false),
        FieldValue::Number(n) if *n == 1.0 => Some(true),
        FieldValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "כן" => Some(true),
            "false" | "no" | "0" | "לא" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

// === checks ===

fn required_fields(
    rule: &ValidationRule,
    records: &[Record],
    fields: &[String],
) -> Result<Vec<ValidationIssue>> {
    ensure_fields(rule, fields)?;
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        for field in fields {
            let missing = record.get(field).map_or(true, FieldValue::is_null);
            if missing {
                issues.push(
                    ValidationIssue::new(
                        rule,
                        format!("required field `{field}` is missing or empty"),
                    )
                    .with_field(field)
                    .with_record_index(index)
                    .with_expected("a non-empty value"),
                );
            }
        }
    }
    Ok(issues)
}

fn max_field_length(
    rule: &ValidationRule,
    records: &[Record],
    max_chars: usize,
    fields: Option<&[String]>,
) -> Result<Vec<ValidationIssue>> {
    if max_chars == 0 {
        return Err(misconfigured(rule, "max_chars must be at least 1"));
    }
    if let Some(fields) = fields {
        ensure_fields(rule, fields)?;
    }
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        for (name, value) in record.iter() {
            let Some(text) = value.as_text() else { continue };
            if let Some(fields) = fields {
                if !fields.iter().any(|f| f == name) {
                    continue;
                }
            }
            let chars = text.chars().count();
            if chars > max_chars {
                issues.push(
                    ValidationIssue::new(
                        rule,
                        format!("field `{name}` has {chars} characters, limit is {max_chars}"),
                    )
                    .with_field(name)
                    .with_record_index(index)
                    .with_actual(chars.to_string())
                    .with_expected(format!("at most {max_chars}")),
                );
            }
        }
    }
    Ok(issues)
}

fn hebrew_script_presence(
    rule: &ValidationRule,
    records: &[Record],
    fields: &[String],
) -> Result<Vec<ValidationIssue>> {
    ensure_fields(rule, fields)?;
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        for field in fields {
            let Some(text) = record.get(field).and_then(FieldValue::as_text) else {
                continue;
            };
            if looks_like_mojibake(text) {
                issues.push(
                    ValidationIssue::new(
                        rule,
                        format!("field `{field}` looks like garbled Hebrew (encoding artifacts)"),
                    )
                    .with_field(field)
                    .with_record_index(index)
                    .with_actual(text)
                    .with_confidence(0.95),
                );
            } else if !has_hebrew(text) {
                issues.push(
                    ValidationIssue::new(
                        rule,
                        format!("field `{field}` contains no Hebrew script"),
                    )
                    .with_field(field)
                    .with_record_index(index)
                    .with_actual(text)
                    .with_confidence(0.6),
                );
            }
        }
    }
    Ok(issues)
}

fn hebrew_name_charset(
    rule: &ValidationRule,
    records: &[Record],
    fields: &[String],
) -> Result<Vec<ValidationIssue>> {
    ensure_fields(rule, fields)?;
    let name_re = build_regex(rule, NAME_PATTERN)?;
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        for field in fields {
            let Some(text) = record.get(field).and_then(FieldValue::as_text) else {
                continue;
            };
            if !name_re.is_match(text) {
                issues.push(
                    ValidationIssue::new(
                        rule,
                        format!("field `{field}` contains characters not expected in a name"),
                    )
                    .with_field(field)
                    .with_record_index(index)
                    .with_actual(text)
                    .with_confidence(0.9),
                );
            }
        }
    }
    Ok(issues)
}

fn mixed_script_ratio(
    rule: &ValidationRule,
    records: &[Record],
    dominance: f64,
) -> Result<Vec<ValidationIssue>> {
    if !(0.5..=1.0).contains(&dominance) {
        return Err(misconfigured(
            rule,
            format!("dominance must be within [0.5, 1.0], got {dominance}"),
        ));
    }
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        for (name, value) in record.iter() {
            let Some(text) = value.as_text() else { continue };
            let mut hebrew = 0usize;
            let mut latin = 0usize;
            for c in text.chars() {
                if is_hebrew_letter(c) {
                    hebrew += 1;
                } else if c.is_ascii_alphabetic() {
                    latin += 1;
                }
            }
            let total = hebrew + latin;
            if total < MIN_SCRIPT_LETTERS {
                continue;
            }
            let share = hebrew.max(latin) as f64 / total as f64;
            if share < dominance {
                issues.push(
                    ValidationIssue::new(
                        rule,
                        format!(
                            "field `{name}` mixes scripts with no dominant one \
                             ({hebrew} Hebrew / {latin} Latin letters)"
                        ),
                    )
                    .with_field(name)
                    .with_record_index(index)
                    .with_actual(format!("{share:.2}"))
                    .with_expected(format!("at least {dominance:.2}"))
                    .with_confidence(0.7),
                );
            }
        }
    }
    Ok(issues)
}

fn date_fields(
    rule: &ValidationRule,
    records: &[Record],
    fields: &[String],
) -> Result<Vec<ValidationIssue>> {
    ensure_fields(rule, fields)?;
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        for field in fields {
            let Some(value) = record.get(field) else { continue };
            if value.is_null() || value.as_date().is_some() {
                continue;
            }
            issues.push(
                ValidationIssue::new(rule, format!("field `{field}` is not a valid date"))
                    .with_field(field)
                    .with_record_index(index)
                    .with_actual(value.to_string())
                    .with_expected("YYYY-MM-DD"),
            );
        }
    }
    Ok(issues)
}

fn boolean_fields(
    rule: &ValidationRule,
    records: &[Record],
    fields: &[String],
) -> Result<Vec<ValidationIssue>> {
    ensure_fields(rule, fields)?;
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        for field in fields {
            let Some(value) = record.get(field) else { continue };
            if value.is_null() || recognized_bool(value).is_some() {
                continue;
            }
            issues.push(
                ValidationIssue::new(rule, format!("field `{field}` is not a recognized boolean"))
                    .with_field(field)
                    .with_record_index(index)
                    .with_actual(value.to_string())
                    .with_expected("true/false, yes/no, 1/0, כן/לא"),
            );
        }
    }
    Ok(issues)
}

fn date_ordering(
    rule: &ValidationRule,
    records: &[Record],
    earlier: &str,
    later: &str,
) -> Result<Vec<ValidationIssue>> {
    if earlier == later {
        return Err(misconfigured(rule, "earlier and later name the same field"));
    }
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        let Some(earlier_date) = record.get(earlier).and_then(FieldValue::as_date) else {
            continue;
        };
        let Some(later_date) = record.get(later).and_then(FieldValue::as_date) else {
            continue;
        };
        if earlier_date > later_date {
            issues.push(
                ValidationIssue::new(
                    rule,
                    format!("`{earlier}` {earlier_date} is after `{later}` {later_date}"),
                )
                .with_field(earlier)
                .with_record_index(index)
                .with_actual(earlier_date.to_string())
                .with_expected(format!("on or before {later_date}")),
            );
        }
    }
    Ok(issues)
}

fn status_consistency(
    rule: &ValidationRule,
    records: &[Record],
    flag_field: &str,
    date_field: &str,
) -> Result<Vec<ValidationIssue>> {
    if flag_field == date_field {
        return Err(misconfigured(rule, "flag and date name the same field"));
    }
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        let flag_value = record.get(flag_field);
        let flag_on = flag_value.and_then(recognized_bool);
        let flag_absent = flag_value.map_or(true, |v| v.is_null());
        let date_set = record.get(date_field).map_or(false, |v| !v.is_null());
        if flag_on == Some(true) && !date_set {
            issues.push(
                ValidationIssue::new(
                    rule,
                    format!("`{flag_field}` is set but `{date_field}` is empty"),
                )
                .with_field(date_field)
                .with_record_index(index),
            );
        } else if date_set && (flag_on == Some(false) || flag_absent) {
            issues.push(
                ValidationIssue::new(
                    rule,
                    format!("`{date_field}` is set but `{flag_field}` is not"),
                )
                .with_field(flag_field)
                .with_record_index(index),
            );
        }
    }
    Ok(issues)
}

fn completeness_ratio(
    rule: &ValidationRule,
    records: &[Record],
    min_ratio: f64,
) -> Result<Vec<ValidationIssue>> {
    if !(0.0..=1.0).contains(&min_ratio) {
        return Err(misconfigured(
            rule,
            format!("min_ratio must be within [0.0, 1.0], got {min_ratio}"),
        ));
    }
    let total: usize = records.iter().map(Record::len).sum();
    if total == 0 {
        return Ok(Vec::new());
    }
    let filled: usize = records.iter().map(Record::non_null_len).sum();
    let ratio = filled as f64 / total as f64;
    if ratio >= min_ratio {
        return Ok(Vec::new());
    }
    Ok(vec![ValidationIssue::new(
        rule,
        format!("dataset completeness {ratio:.2} is below the {min_ratio:.2} threshold"),
    )
    .with_actual(format!("{ratio:.2}"))
    .with_expected(format!("at least {min_ratio:.2}"))])
}

fn duplicate_records(
    rule: &ValidationRule,
    records: &[Record],
    key_fields: &[String],
) -> Result<Vec<ValidationIssue>> {
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        let key = if key_fields.is_empty() {
            content_hash(record)
        } else {
            // Records without any key value cannot meaningfully collide;
            // the required-fields rule owns the missing key.
            let keyed = key_fields
                .iter()
                .any(|f| record.get(f).map_or(false, |v| !v.is_null()));
            if !keyed {
                continue;
            }
            business_key_hash(record, key_fields)
        };
        match first_seen.get(&key) {
            Some(&first) => {
                let on = if key_fields.is_empty() {
                    "record content".to_string()
                } else {
                    key_fields.join(", ")
                };
                issues.push(
                    ValidationIssue::new(rule, format!("duplicate of record {first} on {on}"))
                        .with_record_index(index),
                );
            }
            None => {
                first_seen.insert(key, index);
            }
        }
    }
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RuleCategory, Severity};

    fn rule(kind: RuleKind) -> ValidationRule {
        ValidationRule::new("test.rule", "Test", RuleCategory::Schema, Severity::Error, kind)
    }

    fn inspection(pairs: &[(&str, FieldValue)]) -> Record {
        Record::from_pairs(pairs.iter().map(|(n, v)| (*n, v.clone())))
    }

    #[test]
    fn test_required_fields_flags_missing_and_null() {
        let records = vec![
            inspection(&[("building_id", "B-1".into())]),
            inspection(&[("building_id", FieldValue::Null)]),
            inspection(&[("other", "x".into())]),
        ];
        let r = rule(RuleKind::RequiredFields {
            fields: vec!["building_id".into()],
        });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].record_index, Some(1));
        assert_eq!(issues[1].record_index, Some(2));
        assert_eq!(issues[0].field.as_deref(), Some("building_id"));
    }

    #[test]
    fn test_empty_field_list_is_misconfigured() {
        let r = rule(RuleKind::RequiredFields { fields: vec![] });
        let err = run_check(&r, &[]).unwrap_err();
        assert!(matches!(err, BedekError::RuleExecution { .. }));
    }

    #[test]
    fn test_max_field_length_counts_chars_not_bytes() {
        // Five Hebrew letters are ten bytes; the limit is in characters.
        let records = vec![inspection(&[("address", "שלוםם".into())])];
        let ok = rule(RuleKind::MaxFieldLength {
            max_chars: 5,
            fields: None,
        });
        assert!(run_check(&ok, &records).unwrap().is_empty());
        let tight = rule(RuleKind::MaxFieldLength {
            max_chars: 4,
            fields: None,
        });
        let issues = run_check(&tight, &records).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].actual.as_deref(), Some("5"));
    }

    #[test]
    fn test_hebrew_presence_distinguishes_mojibake_from_latin() {
        let records = vec![
            inspection(&[("address", "רחוב הרצל 5".into())]),
            inspection(&[("address", "×¨×—×•×‘ ×”×¨×¦×œ".into())]),
            inspection(&[("address", "Herzl St 5".into())]),
        ];
        let r = rule(RuleKind::HebrewScriptPresence {
            fields: vec!["address".into()],
        });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].record_index, Some(1));
        assert!(issues[0].message.contains("garbled"));
        assert_eq!(issues[0].confidence, 0.95);
        assert_eq!(issues[1].record_index, Some(2));
        assert_eq!(issues[1].confidence, 0.6);
    }

    #[test]
    fn test_name_charset_rejects_digits() {
        let records = vec![
            inspection(&[("inspector_name", "דוד כהן".into())]),
            inspection(&[("inspector_name", "O'Brien-Smith".into())]),
            inspection(&[("inspector_name", "דוד כהן 123".into())]),
        ];
        let r = rule(RuleKind::HebrewNameCharset {
            fields: vec!["inspector_name".into()],
        });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].record_index, Some(2));
    }

    #[test]
    fn test_mixed_script_flags_field_without_dominant_script() {
        let records = vec![
            // 4 Hebrew vs 4 Latin letters, neither reaches 80%.
            inspection(&[("notes", "שלום abcd".into())]),
            // 10 Hebrew vs 2 Latin letters, Hebrew dominates.
            inspection(&[("notes", "בדיקת מבנה תקינה ok".into())]),
        ];
        let r = rule(RuleKind::MixedScriptRatio { dominance: 0.8 });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].record_index, Some(0));
        assert_eq!(issues[0].field.as_deref(), Some("notes"));
    }

    #[test]
    fn test_mixed_script_skips_short_fields() {
        let records = vec![inspection(&[("notes", "שב ab".into())])];
        let r = rule(RuleKind::MixedScriptRatio { dominance: 0.8 });
        assert!(run_check(&r, &records).unwrap().is_empty());
    }

    #[test]
    fn test_bad_dominance_is_misconfigured() {
        let r = rule(RuleKind::MixedScriptRatio { dominance: 1.5 });
        assert!(run_check(&r, &[]).is_err());
        let r = rule(RuleKind::MixedScriptRatio {
            dominance: f64::NAN,
        });
        assert!(run_check(&r, &[]).is_err());
    }

    #[test]
    fn test_date_fields_accepts_typed_and_iso_text() {
        let records = vec![inspection(&[
            (
                "inspection_date",
                FieldValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
            ),
            ("target_date", "2024-06-01".into()),
            ("execution_date", "01/06/2024".into()),
        ])];
        let r = rule(RuleKind::DateFields {
            fields: vec![
                "inspection_date".into(),
                "target_date".into(),
                "execution_date".into(),
            ],
        });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field.as_deref(), Some("execution_date"));
        assert_eq!(issues[0].actual.as_deref(), Some("01/06/2024"));
    }

    #[test]
    fn test_boolean_fields_accept_hebrew_pair() {
        let records = vec![inspection(&[
            ("distributed", "כן".into()),
            ("approved", "אולי".into()),
        ])];
        let r = rule(RuleKind::BooleanFields {
            fields: vec!["distributed".into(), "approved".into()],
        });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field.as_deref(), Some("approved"));
    }

    #[test]
    fn test_date_ordering_flags_execution_after_target() {
        let records = vec![
            inspection(&[
                ("execution_date", "2024-07-01".into()),
                ("target_date", "2024-06-01".into()),
            ]),
            inspection(&[
                ("execution_date", "2024-05-01".into()),
                ("target_date", "2024-06-01".into()),
            ]),
            inspection(&[("target_date", "2024-06-01".into())]),
        ];
        let r = rule(RuleKind::DateOrdering {
            earlier: "execution_date".into(),
            later: "target_date".into(),
        });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].record_index, Some(0));
    }

    #[test]
    fn test_status_consistency_both_directions() {
        let records = vec![
            inspection(&[("distributed", true.into()), ("distribution_date", FieldValue::Null)]),
            inspection(&[
                ("distributed", false.into()),
                ("distribution_date", "2024-05-01".into()),
            ]),
            inspection(&[
                ("distributed", "כן".into()),
                ("distribution_date", "2024-05-01".into()),
            ]),
        ];
        let r = rule(RuleKind::StatusConsistency {
            flag_field: "distributed".into(),
            date_field: "distribution_date".into(),
        });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].record_index, Some(0));
        assert_eq!(issues[1].record_index, Some(1));
    }

    #[test]
    fn test_completeness_single_dataset_issue() {
        let records = vec![
            inspection(&[("a", "x".into()), ("b", FieldValue::Null)]),
            inspection(&[("a", "y".into()), ("b", FieldValue::Null)]),
        ];
        let r = rule(RuleKind::CompletenessRatio { min_ratio: 0.85 });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].record_index, None);
        assert_eq!(issues[0].actual.as_deref(), Some("0.50"));
    }

    #[test]
    fn test_completeness_empty_dataset_is_clean() {
        let r = rule(RuleKind::CompletenessRatio { min_ratio: 0.85 });
        assert!(run_check(&r, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_duplicates_flag_every_non_first_occurrence() {
        let records = vec![
            inspection(&[("building_id", "B-1".into()), ("inspection_date", "2024-05-01".into())]),
            inspection(&[("building_id", "B-2".into()), ("inspection_date", "2024-05-01".into())]),
            inspection(&[("building_id", "B-1".into()), ("inspection_date", "2024-05-01".into())]),
            inspection(&[("building_id", "B-1".into()), ("inspection_date", "2024-05-01".into())]),
        ];
        let r = rule(RuleKind::DuplicateRecords {
            key_fields: vec!["building_id".into(), "inspection_date".into()],
        });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].record_index, Some(2));
        assert_eq!(issues[1].record_index, Some(3));
        assert!(issues[0].message.contains("record 0"));
    }

    #[test]
    fn test_duplicates_skip_records_without_key_values() {
        let records = vec![
            inspection(&[("other", "x".into())]),
            inspection(&[("other", "y".into())]),
        ];
        let r = rule(RuleKind::DuplicateRecords {
            key_fields: vec!["building_id".into()],
        });
        assert!(run_check(&r, &records).unwrap().is_empty());
    }

    #[test]
    fn test_duplicates_on_content_when_key_empty() {
        let records = vec![
            inspection(&[("a", "x".into())]),
            inspection(&[("a", "x".into())]),
            inspection(&[("a", "y".into())]),
        ];
        let r = rule(RuleKind::DuplicateRecords { key_fields: vec![] });
        let issues = run_check(&r, &records).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].record_index, Some(1));
    }
}
