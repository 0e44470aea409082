//! Content hashing for records and source payloads.
//!
//! Two levels of identity: a whole-source digest for skip-on-reingest, and
//! per-record digests for duplicate detection. Record digests are computed
//! over a canonical rendering so field order in the source never matters.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::record::Record;

/// Stable digest of a record's content.
///
/// Non-null fields are rendered as `name=value` lines, sorted by field name,
/// then hashed with SHA-256. Null fields are excluded so a record with an
/// empty `notes` column and one missing the column entirely hash the same.
pub fn content_hash(record: &Record) -> String {
    let mut lines: Vec<String> = record
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(name, value)| format!("{name}={}", value.canonical_text()))
        .collect();
    lines.sort_unstable();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Digest over a configured subset of fields, for business-level identity
/// (e.g. permit id + inspection date) where incidental columns may differ
/// between otherwise-identical records.
///
/// Key fields are taken in sorted order regardless of how the configuration
/// listed them. A key field that is absent or null contributes the literal
/// `null` so partially-filled records still hash deterministically.
pub fn business_key_hash(record: &Record, key_fields: &[String]) -> String {
    let mut names: Vec<&str> = key_fields.iter().map(String::as_str).collect();
    names.sort_unstable();
    names.dedup();

    let mut hasher = Sha256::new();
    for name in names {
        let rendered = match record.get(name) {
            Some(value) if !value.is_null() => value.canonical_text(),
            _ => "null".to_string(),
        };
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(rendered.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 of any readable source, streamed in 8 KiB chunks.
pub fn bytes_sha256<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of a file's raw bytes.
pub fn file_sha256(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    bytes_sha256(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use std::io::Cursor;

    #[test]
    fn test_bytes_sha256_known_vector() {
        let mut cursor = Cursor::new(b"hello world");
        let digest = bytes_sha256(&mut cursor).unwrap();
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_content_hash_is_order_independent() {
        let a = Record::from_pairs([("permit_id", "B-1"), ("city", "חיפה")]);
        let b = Record::from_pairs([("city", "חיפה"), ("permit_id", "B-1")]);
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_content_hash_ignores_null_fields() {
        let mut a = Record::from_pairs([("permit_id", "B-1")]);
        let mut b = Record::from_pairs([("permit_id", "B-1")]);
        a.insert("notes", FieldValue::Null);
        assert_eq!(content_hash(&a), content_hash(&b));

        b.insert("notes", FieldValue::Text("filled".into()));
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_content_hash_changes_with_value() {
        let a = Record::from_pairs([("permit_id", "B-1")]);
        let b = Record::from_pairs([("permit_id", "B-2")]);
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_business_key_hash_ignores_other_fields() {
        let keys = vec!["permit_id".to_string(), "inspection_date".to_string()];
        let a = Record::from_pairs([
            ("permit_id", "B-1"),
            ("inspection_date", "2024-03-01"),
            ("inspector_name", "דוד כהן"),
        ]);
        let b = Record::from_pairs([
            ("permit_id", "B-1"),
            ("inspection_date", "2024-03-01"),
            ("inspector_name", "רות לוי"),
        ]);
        assert_eq!(business_key_hash(&a, &keys), business_key_hash(&b, &keys));
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_business_key_hash_order_of_key_list_is_immaterial() {
        let forward = vec!["permit_id".to_string(), "inspection_date".to_string()];
        let reversed = vec!["inspection_date".to_string(), "permit_id".to_string()];
        let record = Record::from_pairs([("permit_id", "B-1"), ("inspection_date", "2024-03-01")]);
        assert_eq!(
            business_key_hash(&record, &forward),
            business_key_hash(&record, &reversed)
        );
    }

    #[test]
    fn test_business_key_hash_missing_field_is_stable() {
        let keys = vec!["permit_id".to_string(), "inspection_date".to_string()];
        let missing = Record::from_pairs([("permit_id", "B-1")]);
        let mut null_field = Record::from_pairs([("permit_id", "B-1")]);
        null_field.insert("inspection_date", FieldValue::Null);
        assert_eq!(
            business_key_hash(&missing, &keys),
            business_key_hash(&null_field, &keys)
        );
    }
}
