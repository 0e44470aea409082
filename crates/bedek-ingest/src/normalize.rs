//! Hebrew/mixed-direction text normalization.
//!
//! Inspection exports arrive with byte-order marks, bidi control characters,
//! vowel points, presentation-form ligatures, and typographic quotes, all of
//! which break equality checks and duplicate detection downstream. This
//! module reduces every text field to one canonical shape.
//!
//! The pipeline is: strip controls / fold presentation forms and quotes,
//! drop Hebrew combining marks, NFC-compose, collapse whitespace. NFC runs
//! after mark removal: removing a mark can expose a composable base+mark
//! pair, and composing afterwards is what keeps `normalize(normalize(x)) ==
//! normalize(x)` for every input.

use bedek_common::{FieldValue, Record};
use unicode_normalization::UnicodeNormalization;

/// Normalize one text value. Idempotent.
pub fn normalize_text(input: &str) -> String {
    let mut mapped = String::with_capacity(input.len());
    for ch in input.chars() {
        map_char(ch, &mut mapped);
    }

    let composed: String = mapped
        .chars()
        .filter(|&ch| !is_hebrew_mark(ch))
        .nfc()
        .collect();

    collapse_whitespace(&composed)
}

/// Normalize every text field of a record in place. A field whose text
/// normalizes to the empty string becomes [`FieldValue::Null`], so fields
/// holding only whitespace or marks count as missing downstream.
pub fn normalize_record(record: &mut Record) {
    for (_, value) in record.iter_mut() {
        if let FieldValue::Text(text) = value {
            let normalized = normalize_text(text);
            if normalized.is_empty() {
                *value = FieldValue::Null;
            } else {
                *text = normalized;
            }
        }
    }
}

fn map_char(ch: char, out: &mut String) {
    match ch {
        // BOM and bidi controls: LRM/RLM/ALM, embeddings, overrides, PDF,
        // and the four isolate controls.
        '\u{feff}' | '\u{200e}' | '\u{200f}' | '\u{061c}' | '\u{202a}' | '\u{202b}'
        | '\u{202c}' | '\u{202d}' | '\u{202e}' | '\u{2066}' | '\u{2067}' | '\u{2068}'
        | '\u{2069}' => {}

        // Typographic single quotes and the Hebrew geresh.
        '\u{2018}' | '\u{2019}' | '\u{201a}' | '\u{201b}' | '\u{05f3}' => out.push('\''),

        // Typographic double quotes and the Hebrew gershayim.
        '\u{201c}' | '\u{201d}' | '\u{201e}' | '\u{201f}' | '\u{05f4}' => out.push('"'),

        '\u{fb1d}'..='\u{fb4f}' => match presentation_form(ch) {
            Some(plain) => out.push_str(plain),
            None => out.push(ch),
        },

        _ => out.push(ch),
    }
}

/// Hebrew presentation forms (U+FB1D..U+FB4F) folded to plain letters. The
/// vowel points baked into these forms are dropped here, matching the mark
/// removal applied to regular text.
fn presentation_form(ch: char) -> Option<&'static str> {
    let plain = match ch {
        '\u{fb1d}' => "י",
        '\u{fb1e}' => "", // combining varika
        '\u{fb1f}' => "יי",
        '\u{fb20}' => "ע",
        '\u{fb21}' => "א",
        '\u{fb22}' => "ד",
        '\u{fb23}' => "ה",
        '\u{fb24}' => "כ",
        '\u{fb25}' => "ל",
        '\u{fb26}' => "ם",
        '\u{fb27}' => "ר",
        '\u{fb28}' => "ת",
        '\u{fb29}' => "+",
        '\u{fb2a}' | '\u{fb2b}' | '\u{fb2c}' | '\u{fb2d}' => "ש",
        '\u{fb2e}' | '\u{fb2f}' | '\u{fb30}' => "א",
        '\u{fb31}' | '\u{fb4c}' => "ב",
        '\u{fb32}' => "ג",
        '\u{fb33}' => "ד",
        '\u{fb34}' => "ה",
        '\u{fb35}' | '\u{fb4b}' => "ו",
        '\u{fb36}' => "ז",
        '\u{fb38}' => "ט",
        '\u{fb39}' => "י",
        '\u{fb3a}' => "ך",
        '\u{fb3b}' | '\u{fb4d}' => "כ",
        '\u{fb3c}' => "ל",
        '\u{fb3e}' => "מ",
        '\u{fb40}' => "נ",
        '\u{fb41}' => "ס",
        '\u{fb43}' => "ף",
        '\u{fb44}' | '\u{fb4e}' => "פ",
        '\u{fb46}' => "צ",
        '\u{fb47}' => "ק",
        '\u{fb48}' => "ר",
        '\u{fb49}' => "ש",
        '\u{fb4a}' => "ת",
        // The alef-lamed ligature is the one true two-letter decomposition.
        '\u{fb4f}' => "אל",
        _ => return None,
    };
    Some(plain)
}

/// Hebrew combining marks: cantillation (U+0591..U+05AF) and vowel points.
/// Maqaf, paseq, sof pasuq, and nun hafukha are real punctuation/letters and
/// are kept.
fn is_hebrew_mark(ch: char) -> bool {
    matches!(ch,
        '\u{0591}'..='\u{05af}'
        | '\u{05b0}'..='\u{05bd}'
        | '\u{05bf}'
        | '\u{05c1}' | '\u{05c2}'
        | '\u{05c4}' | '\u{05c5}'
        | '\u{05c7}')
}

/// Collapse every whitespace run to a single ASCII space and trim both ends.
fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_run = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            in_run = true;
        } else {
            if in_run && !out.is_empty() {
                out.push(' ');
            }
            in_run = false;
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_bom_and_directional_marks() {
        assert_eq!(normalize_text("\u{feff}\u{200f}שלום\u{200e}"), "שלום");
        assert_eq!(normalize_text("\u{202b}רחוב הרצל 12\u{202c}"), "רחוב הרצל 12");
    }

    #[test]
    fn test_removes_niqqud() {
        // shin + shin-dot + qamats, lamed, vav + holam, final mem
        let pointed = "\u{5e9}\u{5c1}\u{5b8}\u{5dc}\u{5d5}\u{5b9}\u{5dd}";
        assert_eq!(normalize_text(pointed), "שלום");
    }

    #[test]
    fn test_removes_cantillation() {
        let chanted = "\u{5d1}\u{591}\u{5b0}\u{5e8}\u{5b5}\u{5a9}\u{5d0}";
        assert_eq!(normalize_text(chanted), "ברא");
    }

    #[test]
    fn test_folds_presentation_forms() {
        assert_eq!(normalize_text("\u{fb4f}"), "אל");
        assert_eq!(normalize_text("\u{fb31}\u{fb4a}"), "בת");
        assert_eq!(normalize_text("ישר\u{fb21}ל"), "ישראל");
    }

    #[test]
    fn test_normalizes_quotes() {
        assert_eq!(normalize_text("\u{201c}בדק\u{201d}"), "\"בדק\"");
        assert_eq!(normalize_text("צה\u{5f4}ל"), "צה\"ל");
        assert_eq!(normalize_text("\u{2019}ok\u{2018}"), "'ok'");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize_text("  רחוב\t\tהרצל \n 12  "), "רחוב הרצל 12");
        assert_eq!(normalize_text(" \t\n "), "");
    }

    #[test]
    fn test_mixed_script_passes_through() {
        assert_eq!(normalize_text("בדיקה Building 12"), "בדיקה Building 12");
    }

    #[test]
    fn test_idempotent_when_mark_removal_exposes_composition() {
        // e + Hebrew ole (blocks the acute from composing) + combining acute.
        // Removing the ole exposes e+acute; composing afterwards keeps the
        // second pass a no-op.
        let tricky = "e\u{05ab}\u{0301}";
        let once = normalize_text(tricky);
        assert_eq!(once, "\u{e9}");
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn test_normalize_record_nulls_empty_text() {
        let mut record = Record::from_pairs([
            ("address", FieldValue::from("  רחוב  הרצל ")),
            ("notes", FieldValue::from(" \u{200f} ")),
            ("count", FieldValue::from(3.0)),
        ]);
        normalize_record(&mut record);
        assert_eq!(
            record.get("address"),
            Some(&FieldValue::Text("רחוב הרצל".into()))
        );
        assert_eq!(record.get("notes"), Some(&FieldValue::Null));
        assert_eq!(record.get("count"), Some(&FieldValue::Number(3.0)));
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(s in "\\PC*") {
            let once = normalize_text(&s);
            prop_assert_eq!(normalize_text(&once), once);
        }

        #[test]
        fn prop_normalize_is_idempotent_on_hebrew(
            s in "[\\x{0590}-\\x{05FF}\\x{FB1D}-\\x{FB4F}\\x{200E}\\x{200F}a-zA-Z0-9 \\t\"']{0,64}"
        ) {
            let once = normalize_text(&s);
            prop_assert_eq!(normalize_text(&once), once);
        }

        #[test]
        fn prop_normalized_has_no_marks_or_controls(s in "\\PC*") {
            let once = normalize_text(&s);
            prop_assert!(!once.chars().any(is_hebrew_mark));
            prop_assert!(!once.contains('\u{200e}'), "normalized text contains U+200E");
            prop_assert!(!once.contains('\u{feff}'), "normalized text contains U+FEFF");
        }
    }
}
