//! Tabular workbook (.xlsx) decoding.
//!
//! An .xlsx file is a ZIP container holding XML parts. We inflate the shared
//! string table and the first worksheet, walk the sheet's `<row>`/`<c>`
//! elements, and map cells onto the header row. Numeric cells stay numbers;
//! date serials are not resolved here because cell styles are not reliable
//! enough to distinguish them, and the date rules validate downstream.

use std::io::{Cursor, Read, Seek};

use bedek_common::{BedekError, FieldValue, Record, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;
use zip::result::ZipError;
use zip::ZipArchive;

/// A cell that could not be interpreted carries its message; the whole row
/// becomes one `Err` item during assembly.
type CellResult = std::result::Result<FieldValue, String>;

struct SheetRow {
    number: usize,
    cells: Vec<(usize, CellResult)>,
}

#[derive(Clone, Copy)]
enum CellType {
    Shared,
    Bool,
    InlineStr,
    FormulaStr,
    Error,
    Number,
}

/// Decode a workbook into materialized rows. The outer `Err` means the
/// container itself is unreadable; inner `Err` items are per-row failures.
pub fn decode_workbook(data: &[u8]) -> Result<Vec<Result<Record>>> {
    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(|err| {
        BedekError::UnreadableSource(format!("not a valid workbook container: {err}"))
    })?;

    let shared = match read_archive_file(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let sheet_xml = read_archive_file(&mut archive, "xl/worksheets/sheet1.xml")?.ok_or_else(
        || BedekError::UnreadableSource("workbook has no first worksheet".to_string()),
    )?;

    let rows = parse_sheet(&sheet_xml, &shared)?;
    Ok(assemble_records(rows))
}

fn read_archive_file<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut xml = String::new();
            file.read_to_string(&mut xml).map_err(|err| {
                BedekError::UnreadableSource(format!("cannot inflate {name}: {err}"))
            })?;
            Ok(Some(xml))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(err) => Err(BedekError::UnreadableSource(format!(
            "cannot open {name}: {err}"
        ))),
    }
}

fn bad_xml(err: impl std::fmt::Display) -> BedekError {
    BedekError::UnreadableSource(format!("malformed workbook XML: {err}"))
}

/// Shared string table: one entry per `<si>`, concatenating the text of its
/// `<t>` elements so rich-text runs come out as one string.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(t)) if in_t => {
                current.push_str(&t.unescape().map_err(bad_xml)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(bad_xml(err)),
            _ => {}
        }
    }

    Ok(strings)
}

fn parse_sheet(xml: &str, shared: &[String]) -> Result<Vec<SheetRow>> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<SheetRow> = Vec::new();

    let mut row_cells: Vec<(usize, CellResult)> = Vec::new();
    let mut row_number = 0usize;
    let mut row_counter = 0usize;
    let mut next_col = 0usize;

    let mut in_cell = false;
    let mut cell_col = 0usize;
    let mut cell_type = CellType::Number;
    let mut value_buf = String::new();
    let mut in_v = false;
    let mut in_inline_t = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_counter += 1;
                    row_number = row_ref(&e)?.unwrap_or(row_counter);
                    row_cells.clear();
                    next_col = 0;
                }
                b"c" => {
                    in_cell = true;
                    value_buf.clear();
                    let (col, ty) = cell_attrs(&e, next_col)?;
                    cell_col = col;
                    cell_type = ty;
                }
                b"v" if in_cell => in_v = true,
                b"t" if in_cell => in_inline_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_counter += 1;
                    let number = row_ref(&e)?.unwrap_or(row_counter);
                    rows.push(SheetRow {
                        number,
                        cells: Vec::new(),
                    });
                }
                b"c" => {
                    // Style-only cell with no content: a gap, but it still
                    // advances the implied column position.
                    let (col, _) = cell_attrs(&e, next_col)?;
                    next_col = col + 1;
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_v || in_inline_t => {
                value_buf.push_str(&t.unescape().map_err(bad_xml)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_inline_t = false,
                b"c" => {
                    row_cells.push((cell_col, finalize_cell(cell_type, &value_buf, shared)));
                    next_col = cell_col + 1;
                    in_cell = false;
                }
                b"row" => rows.push(SheetRow {
                    number: row_number,
                    cells: std::mem::take(&mut row_cells),
                }),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(bad_xml(err)),
            _ => {}
        }
    }

    Ok(rows)
}

fn row_ref(e: &BytesStart<'_>) -> Result<Option<usize>> {
    for attr in e.attributes() {
        let attr = attr.map_err(bad_xml)?;
        if attr.key.as_ref() == b"r" {
            let value = attr.unescape_value().map_err(bad_xml)?;
            return Ok(value.trim().parse().ok());
        }
    }
    Ok(None)
}

fn cell_attrs(e: &BytesStart<'_>, fallback_col: usize) -> Result<(usize, CellType)> {
    let mut col = fallback_col;
    let mut ty = CellType::Number;
    for attr in e.attributes() {
        let attr = attr.map_err(bad_xml)?;
        match attr.key.as_ref() {
            b"r" => {
                let value = attr.unescape_value().map_err(bad_xml)?;
                if let Some(parsed) = column_index(&value) {
                    col = parsed;
                }
            }
            b"t" => {
                let value = attr.unescape_value().map_err(bad_xml)?;
                ty = match value.as_ref() {
                    "s" => CellType::Shared,
                    "b" => CellType::Bool,
                    "inlineStr" => CellType::InlineStr,
                    "str" => CellType::FormulaStr,
                    "e" => CellType::Error,
                    _ => CellType::Number,
                };
            }
            _ => {}
        }
    }
    Ok((col, ty))
}

/// Column index from a cell reference like `B3` (0-based).
fn column_index(cell_ref: &str) -> Option<usize> {
    let mut index = 0usize;
    let mut seen = false;
    for ch in cell_ref.chars() {
        if ch.is_ascii_alphabetic() {
            index = index * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
            seen = true;
        } else {
            break;
        }
    }
    if seen {
        Some(index - 1)
    } else {
        None
    }
}

fn finalize_cell(ty: CellType, raw: &str, shared: &[String]) -> CellResult {
    match ty {
        CellType::Shared => {
            let index: usize = raw
                .trim()
                .parse()
                .map_err(|_| format!("bad shared string index '{raw}'"))?;
            shared
                .get(index)
                .map(|s| {
                    if s.trim().is_empty() {
                        FieldValue::Null
                    } else {
                        FieldValue::Text(s.clone())
                    }
                })
                .ok_or_else(|| format!("shared string index {index} out of range"))
        }
        CellType::Bool => match raw.trim() {
            "1" | "true" | "TRUE" => Ok(FieldValue::Bool(true)),
            "0" | "false" | "FALSE" => Ok(FieldValue::Bool(false)),
            other => Err(format!("bad boolean cell value '{other}'")),
        },
        CellType::InlineStr | CellType::FormulaStr => {
            if raw.trim().is_empty() {
                Ok(FieldValue::Null)
            } else {
                Ok(FieldValue::Text(raw.to_string()))
            }
        }
        CellType::Error => Ok(FieldValue::Null),
        CellType::Number => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Ok(FieldValue::Null)
            } else {
                trimmed
                    .parse::<f64>()
                    .map(FieldValue::Number)
                    .map_err(|_| format!("bad numeric cell value '{trimmed}'"))
            }
        }
    }
}

fn assemble_records(rows: Vec<SheetRow>) -> Vec<Result<Record>> {
    let mut iter = rows.into_iter();

    let header: Vec<String> = loop {
        match iter.next() {
            Some(row) => {
                let names = header_names(&row);
                if names.is_empty() {
                    continue;
                }
                break names;
            }
            None => return Vec::new(),
        }
    };

    let mut out = Vec::new();
    let mut dropped_cells = 0usize;
    for row in iter {
        let empty = row
            .cells
            .iter()
            .all(|(_, cell)| matches!(cell, Ok(FieldValue::Null)));
        if empty {
            continue;
        }
        out.push(build_record(&header, row, &mut dropped_cells));
    }

    if dropped_cells > 0 {
        warn!(
            cells = dropped_cells,
            "dropped workbook cells in trailing columns without a header"
        );
    }

    out
}

/// Header names from the first non-empty row. Gaps inside the header get a
/// positional name; columns past the last headered cell do not exist.
fn header_names(row: &SheetRow) -> Vec<String> {
    let mut max_col: Option<usize> = None;
    for (col, cell) in &row.cells {
        if matches!(cell, Ok(value) if !value.is_null()) {
            max_col = Some(max_col.map_or(*col, |m| m.max(*col)));
        }
    }
    let Some(max_col) = max_col else {
        return Vec::new();
    };

    let mut names = vec![String::new(); max_col + 1];
    for (col, cell) in &row.cells {
        if let Ok(value) = cell {
            if *col <= max_col && !value.is_null() {
                names[*col] = header_label(value);
            }
        }
    }
    for (index, name) in names.iter_mut().enumerate() {
        if name.trim().is_empty() {
            *name = format!("column_{}", index + 1);
        }
    }
    names
}

fn header_label(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => s.trim().to_string(),
        FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
            format!("{}", *n as i64)
        }
        other => other.to_string(),
    }
}

fn build_record(header: &[String], row: SheetRow, dropped_cells: &mut usize) -> Result<Record> {
    let SheetRow { number, cells } = row;

    let mut values: Vec<FieldValue> = vec![FieldValue::Null; header.len()];
    for (col, cell) in cells {
        match cell {
            Ok(value) => {
                if col < header.len() {
                    values[col] = value;
                } else if !value.is_null() {
                    *dropped_cells += 1;
                }
            }
            Err(message) => return Err(BedekError::Decode {
                row: number,
                message,
            }),
        }
    }

    let mut record = Record::with_capacity(header.len());
    for (name, value) in header.iter().zip(values) {
        record.insert(name.clone(), value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_xlsx(shared: Option<&str>, sheet: &str) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default();
        if let Some(shared) = shared {
            zip.start_file("xl/sharedStrings.xml", options).unwrap();
            zip.write_all(shared.as_bytes()).unwrap();
        }
        zip.start_file("xl/worksheets/sheet1.xml", options).unwrap();
        zip.write_all(sheet.as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    const SHARED: &str = concat!(
        r#"<?xml version="1.0"?><sst count="4" uniqueCount="4">"#,
        "<si><t>permit_id</t></si>",
        "<si><t>floors</t></si>",
        "<si><t>approved</t></si>",
        "<si><t>B-1</t></si>",
        "</sst>"
    );

    #[test]
    fn test_mixed_cell_types() {
        let sheet = concat!(
            r#"<?xml version="1.0"?><worksheet><sheetData>"#,
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="s"><v>2</v></c></row>"#,
            r#"<row r="2"><c r="A2" t="s"><v>3</v></c><c r="B2"><v>4</v></c><c r="C2" t="b"><v>1</v></c></row>"#,
            r#"<row r="3"><c r="A3" t="inlineStr"><is><t>B-2</t></is></c><c r="C3" t="b"><v>0</v></c></row>"#,
            "</sheetData></worksheet>"
        );
        let rows = decode_workbook(&build_xlsx(Some(SHARED), sheet)).unwrap();
        assert_eq!(rows.len(), 2);

        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.get("permit_id"), Some(&FieldValue::Text("B-1".into())));
        assert_eq!(first.get("floors"), Some(&FieldValue::Number(4.0)));
        assert_eq!(first.get("approved"), Some(&FieldValue::Bool(true)));

        // Row 3 skips column B entirely; the gap must come back as Null.
        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.get("permit_id"), Some(&FieldValue::Text("B-2".into())));
        assert_eq!(second.get("floors"), Some(&FieldValue::Null));
        assert_eq!(second.get("approved"), Some(&FieldValue::Bool(false)));
    }

    #[test]
    fn test_rich_text_shared_string() {
        let shared = concat!(
            "<sst><si><t>name</t></si>",
            "<si><r><t>רחוב </t></r><r><t>הרצל</t></r></si></sst>"
        );
        let sheet = concat!(
            "<worksheet><sheetData>",
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row>"#,
            r#"<row r="2"><c r="A2" t="s"><v>1</v></c></row>"#,
            "</sheetData></worksheet>"
        );
        let rows = decode_workbook(&build_xlsx(Some(shared), sheet)).unwrap();
        assert_eq!(
            rows[0].as_ref().unwrap().get("name"),
            Some(&FieldValue::Text("רחוב הרצל".into()))
        );
    }

    #[test]
    fn test_trailing_unheadered_column_dropped() {
        let sheet = concat!(
            "<worksheet><sheetData>",
            r#"<row r="1"><c r="A1" t="inlineStr"><is><t>a</t></is></c></row>"#,
            r#"<row r="2"><c r="A2"><v>1</v></c><c r="B2"><v>99</v></c></row>"#,
            "</sheetData></worksheet>"
        );
        let rows = decode_workbook(&build_xlsx(None, sheet)).unwrap();
        let record = rows[0].as_ref().unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("a"), Some(&FieldValue::Number(1.0)));
    }

    #[test]
    fn test_bad_shared_index_fails_that_row_only() {
        let shared = "<sst><si><t>a</t></si></sst>";
        let sheet = concat!(
            "<worksheet><sheetData>",
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row>"#,
            r#"<row r="2"><c r="A2" t="s"><v>7</v></c></row>"#,
            r#"<row r="3"><c r="A3"><v>5</v></c></row>"#,
            "</sheetData></worksheet>"
        );
        let rows = decode_workbook(&build_xlsx(Some(shared), sheet)).unwrap();
        assert_eq!(rows.len(), 2);
        match &rows[0] {
            Err(BedekError::Decode { row, .. }) => assert_eq!(*row, 2),
            other => panic!("expected decode error, got {other:?}"),
        }
        assert!(rows[1].is_ok());
    }

    #[test]
    fn test_garbage_container_is_fatal() {
        let err = decode_workbook(b"PK\x03\x04 but not really a zip").unwrap_err();
        assert!(matches!(err, BedekError::UnreadableSource(_)));
    }

    #[test]
    fn test_missing_worksheet_is_fatal() {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default();
        zip.start_file("xl/other.xml", options).unwrap();
        zip.write_all(b"<x/>").unwrap();
        let data = zip.finish().unwrap().into_inner();

        let err = decode_workbook(&data).unwrap_err();
        assert!(matches!(err, BedekError::UnreadableSource(_)));
    }

    #[test]
    fn test_blank_rows_skipped_before_and_after_header() {
        let sheet = concat!(
            "<worksheet><sheetData>",
            r#"<row r="1"/>"#,
            r#"<row r="2"><c r="A2" t="inlineStr"><is><t>a</t></is></c></row>"#,
            r#"<row r="3"/>"#,
            r#"<row r="4"><c r="A4"><v>1</v></c></row>"#,
            "</sheetData></worksheet>"
        );
        let rows = decode_workbook(&build_xlsx(None, sheet)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].as_ref().unwrap().get("a"), Some(&FieldValue::Number(1.0)));
    }

    #[test]
    fn test_column_index_parsing() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("C7"), Some(2));
        assert_eq!(column_index("AA10"), Some(26));
        assert_eq!(column_index("123"), None);
    }
}
