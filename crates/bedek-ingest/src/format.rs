//! Source format detection.
//!
//! Detection runs a three-step cascade: file extension, declared
//! content-type, then a content sniff. The first step with an answer wins.
//! A source that survives all three with no answer is rejected before any
//! decoding starts.

use bedek_common::{BedekError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::source::ByteSource;

/// ZIP local-file-header magic; .xlsx is a ZIP container.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// The formats the decoder stage understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Tabular workbook (.xlsx).
    Workbook,
    /// Delimited text (comma, semicolon, or tab).
    Delimited,
    /// Line-oriented structured text (one JSON object per line).
    Structured,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Workbook => "workbook",
            SourceFormat::Delimited => "delimited",
            SourceFormat::Structured => "structured",
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the format of a source, or fail with a terminal
/// [`BedekError::FormatDetection`]. Unknown formats are never retryable.
pub fn detect_format(source: &ByteSource) -> Result<SourceFormat> {
    if let Some(format) = from_extension(source) {
        debug!(format = %format, "format detected from extension");
        return Ok(format);
    }

    if let Some(format) = from_content_type(source) {
        debug!(format = %format, "format detected from content-type");
        return Ok(format);
    }

    if let Some(format) = sniff(&source.data) {
        debug!(format = %format, "format detected from content sniff");
        return Ok(format);
    }

    Err(BedekError::FormatDetection(format!(
        "unrecognized source (filename: {:?}, content-type: {:?}, {} bytes)",
        source.filename,
        source.content_type,
        source.data.len()
    )))
}

fn from_extension(source: &ByteSource) -> Option<SourceFormat> {
    match source.extension()?.as_str() {
        "xlsx" | "xlsm" => Some(SourceFormat::Workbook),
        "csv" | "tsv" => Some(SourceFormat::Delimited),
        "jsonl" | "ndjson" | "json" => Some(SourceFormat::Structured),
        _ => None,
    }
}

fn from_content_type(source: &ByteSource) -> Option<SourceFormat> {
    let mime: mime::Mime = source.content_type.as_deref()?.parse().ok()?;
    match mime.essence_str() {
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            Some(SourceFormat::Workbook)
        }
        "text/csv" | "text/tab-separated-values" => Some(SourceFormat::Delimited),
        "application/json" | "application/x-ndjson" | "application/jsonl" => {
            Some(SourceFormat::Structured)
        }
        _ => None,
    }
}

/// Content sniff, in order of decreasing certainty: ZIP magic, a leading
/// JSON bracket, then a delimiter heuristic over the first line.
fn sniff(data: &[u8]) -> Option<SourceFormat> {
    if data.starts_with(ZIP_MAGIC) {
        return Some(SourceFormat::Workbook);
    }

    let text = String::from_utf8_lossy(&data[..data.len().min(4096)]);
    let trimmed = text.trim_start_matches(['\u{feff}', ' ', '\t', '\r', '\n']);
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(SourceFormat::Structured);
    }

    let first_line = trimmed.lines().next()?;
    if first_line.contains(',') || first_line.contains(';') || first_line.contains('\t') {
        return Some(SourceFormat::Delimited);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_wins_over_content() {
        // A csv extension on JSON-looking bytes: the extension is checked first.
        let source = ByteSource::from_bytes(b"{\"a\":1}".to_vec()).with_filename("records.csv");
        assert_eq!(detect_format(&source).unwrap(), SourceFormat::Delimited);
    }

    #[test]
    fn test_content_type_fallback() {
        let source = ByteSource::from_bytes(b"col1\tcol2\n1\t2\n".to_vec())
            .with_content_type("text/tab-separated-values; charset=utf-8");
        assert_eq!(detect_format(&source).unwrap(), SourceFormat::Delimited);
    }

    #[test]
    fn test_sniff_zip_magic() {
        let source = ByteSource::from_bytes(b"PK\x03\x04restofzip".to_vec());
        assert_eq!(detect_format(&source).unwrap(), SourceFormat::Workbook);
    }

    #[test]
    fn test_sniff_json_lines() {
        let source = ByteSource::from_bytes("\u{feff}{\"permit_id\":\"B-1\"}\n".as_bytes().to_vec());
        assert_eq!(detect_format(&source).unwrap(), SourceFormat::Structured);
    }

    #[test]
    fn test_sniff_delimited() {
        let source = ByteSource::from_bytes("permit_id;city\nB-1;חיפה\n".as_bytes().to_vec());
        assert_eq!(detect_format(&source).unwrap(), SourceFormat::Delimited);
    }

    #[test]
    fn test_unknown_is_terminal_error() {
        let source = ByteSource::from_bytes(b"plain prose with no structure".to_vec());
        let err = detect_format(&source).unwrap_err();
        assert!(matches!(err, BedekError::FormatDetection(_)));
        assert!(err.is_source_fatal());
    }
}
