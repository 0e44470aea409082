//! Delimited text decoding (CSV and friends).

use bedek_common::{BedekError, FieldValue, Record, Result};
use tracing::warn;

/// Row-by-row reader over delimited text.
///
/// The first non-empty row is the header. Rows shorter than the header get
/// `Null` for the missing fields; cells past the last header column are
/// dropped (warned once per source). Everything decodes as text, `Null` for
/// empty cells; typed interpretation is the quality rules' job.
pub struct DelimitedReader<'a> {
    records: csv::StringRecordsIntoIter<&'a [u8]>,
    header: Vec<String>,
    row: usize,
    warned_extra_columns: bool,
}

impl std::fmt::Debug for DelimitedReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelimitedReader")
            .field("header", &self.header)
            .field("row", &self.row)
            .field("warned_extra_columns", &self.warned_extra_columns)
            .finish_non_exhaustive()
    }
}

impl<'a> DelimitedReader<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let data = data.strip_prefix(b"\xef\xbb\xbf" as &[u8]).unwrap_or(data);
        let delimiter = sniff_delimiter(data);

        let mut records = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(data)
            .into_records();

        let header = loop {
            match records.next() {
                Some(Ok(row)) => {
                    if row.iter().all(|cell| cell.trim().is_empty()) {
                        continue;
                    }
                    break row.iter().map(|cell| cell.trim().to_string()).collect();
                }
                Some(Err(err)) => {
                    return Err(BedekError::UnreadableSource(format!(
                        "cannot read header row: {err}"
                    )))
                }
                None => {
                    return Err(BedekError::UnreadableSource(
                        "delimited source has no rows".to_string(),
                    ))
                }
            }
        };

        Ok(Self {
            records,
            header,
            row: 0,
            warned_extra_columns: false,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }
}

impl Iterator for DelimitedReader<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.records.next()? {
                Ok(row) => row,
                Err(err) => {
                    self.row += 1;
                    return Some(Err(BedekError::Decode {
                        row: self.row,
                        message: err.to_string(),
                    }));
                }
            };

            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            self.row += 1;

            if row.len() > self.header.len() && !self.warned_extra_columns {
                warn!(
                    header_columns = self.header.len(),
                    row_columns = row.len(),
                    "dropping cells in trailing columns without a header"
                );
                self.warned_extra_columns = true;
            }

            let mut record = Record::with_capacity(self.header.len());
            for (index, name) in self.header.iter().enumerate() {
                let value = match row.get(index) {
                    Some(cell) if !cell.trim().is_empty() => FieldValue::Text(cell.to_string()),
                    _ => FieldValue::Null,
                };
                record.insert(name.clone(), value);
            }
            return Some(Ok(record));
        }
    }
}

/// Pick the delimiter by counting candidates in the first line.
fn sniff_delimiter(data: &[u8]) -> u8 {
    let first_line = data.split(|&b| b == b'\n').next().unwrap_or(data);
    let mut best = (b',', 0usize);
    for candidate in [b',', b';', b'\t'] {
        let count = first_line.iter().filter(|&&b| b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(data: &str) -> (Vec<Record>, usize) {
        let reader = DelimitedReader::new(data.as_bytes()).unwrap();
        let mut records = Vec::new();
        let mut failed = 0;
        for item in reader {
            match item {
                Ok(record) => records.push(record),
                Err(_) => failed += 1,
            }
        }
        (records, failed)
    }

    #[test]
    fn test_comma_with_header() {
        let (records, failed) = collect("permit_id,city\nB-1,חיפה\nB-2,תל אביב\n");
        assert_eq!(failed, 0);
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].get("permit_id"),
            Some(&FieldValue::Text("B-1".into()))
        );
        assert_eq!(records[1].get("city"), Some(&FieldValue::Text("תל אביב".into())));
    }

    #[test]
    fn test_semicolon_sniffed() {
        let (records, _) = collect("a;b\n1;2\n");
        assert_eq!(records[0].get("b"), Some(&FieldValue::Text("2".into())));
    }

    #[test]
    fn test_tab_sniffed() {
        let (records, _) = collect("a\tb\n1\t2\n");
        assert_eq!(records[0].get("a"), Some(&FieldValue::Text("1".into())));
    }

    #[test]
    fn test_short_row_fills_nulls() {
        let (records, failed) = collect("a,b,c\n1,2\n");
        assert_eq!(failed, 0);
        assert_eq!(records[0].get("c"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_long_row_drops_trailing_columns() {
        let (records, failed) = collect("a,b\n1,2,3,4\n");
        assert_eq!(failed, 0);
        assert_eq!(records[0].len(), 2);
        assert!(records[0].get("a").is_some());
    }

    #[test]
    fn test_blank_rows_and_empty_cells() {
        let (records, failed) = collect("a,b\n\n1,\n\n,2\n");
        assert_eq!(failed, 0);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("b"), Some(&FieldValue::Null));
        assert_eq!(records[1].get("a"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_bom_stripped_from_header() {
        let data = "\u{feff}permit_id,city\nB-1,חיפה\n";
        let reader = DelimitedReader::new(data.as_bytes()).unwrap();
        assert_eq!(reader.header(), &["permit_id".to_string(), "city".to_string()]);
    }

    #[test]
    fn test_empty_source_is_fatal() {
        let err = DelimitedReader::new(b"").unwrap_err();
        assert!(matches!(err, BedekError::UnreadableSource(_)));
    }

    #[test]
    fn test_bad_utf8_row_is_skipped_not_fatal() {
        let mut data = b"a,b\nok,fine\n".to_vec();
        data.extend_from_slice(b"bad,\xff\xfe\n");
        data.extend_from_slice(b"still,good\n");
        let reader = DelimitedReader::new(&data).unwrap();
        let mut ok = 0;
        let mut failed = 0;
        for item in reader {
            match item {
                Ok(_) => ok += 1,
                Err(err) => {
                    assert!(matches!(err, BedekError::Decode { .. }));
                    failed += 1;
                }
            }
        }
        assert_eq!(ok, 2);
        assert_eq!(failed, 1);
    }
}
