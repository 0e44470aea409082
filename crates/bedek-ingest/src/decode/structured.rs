//! Line-oriented structured text decoding (one JSON object per line).

use bedek_common::{BedekError, Record, Result};

/// Row-by-row reader over JSON-lines text.
///
/// Each non-blank line must be a flat JSON object of scalars; nested arrays
/// or objects reject that line only. Field order follows the document.
#[derive(Debug)]
pub struct StructuredReader<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> StructuredReader<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|err| {
            BedekError::UnreadableSource(format!("structured source is not valid UTF-8: {err}"))
        })?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Ok(Self {
            lines: text.lines().enumerate(),
        })
    }
}

impl Iterator for StructuredReader<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (index, line) = self.lines.next()?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(parse_line(index + 1, trimmed));
        }
    }
}

fn parse_line(row: usize, line: &str) -> Result<Record> {
    serde_json::from_str::<Record>(line).map_err(|err| BedekError::Decode {
        row,
        message: format!("not a flat JSON object of scalar fields: {err}"),
    })
}
