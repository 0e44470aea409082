//! Decoders: raw bytes into records, one per source format.
//!
//! All three decoders share the same failure contract: a malformed row comes
//! through the iterator as an `Err` item for the caller to count and skip,
//! while an unreadable container fails `decode` itself.

pub mod delimited;
pub mod structured;
pub mod workbook;

use bedek_common::{Record, Result};

use crate::format::SourceFormat;

pub use delimited::DelimitedReader;
pub use structured::StructuredReader;

/// Iterator over decoded records.
///
/// Delimited and structured sources are read row by row; a workbook is
/// inflated up front because the ZIP container cannot be streamed row-wise.
pub struct RecordReader<'a> {
    inner: ReaderKind<'a>,
}

enum ReaderKind<'a> {
    Delimited(DelimitedReader<'a>),
    Structured(StructuredReader<'a>),
    Workbook(std::vec::IntoIter<Result<Record>>),
}

impl Iterator for RecordReader<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            ReaderKind::Delimited(reader) => reader.next(),
            ReaderKind::Structured(reader) => reader.next(),
            ReaderKind::Workbook(rows) => rows.next(),
        }
    }
}

/// Build a record reader for already-detected source bytes.
pub fn decode(data: &[u8], format: SourceFormat) -> Result<RecordReader<'_>> {
    let inner = match format {
        SourceFormat::Delimited => ReaderKind::Delimited(DelimitedReader::new(data)?),
        SourceFormat::Structured => ReaderKind::Structured(StructuredReader::new(data)?),
        SourceFormat::Workbook => {
            ReaderKind::Workbook(workbook::decode_workbook(data)?.into_iter())
        }
    };
    Ok(RecordReader { inner })
}
