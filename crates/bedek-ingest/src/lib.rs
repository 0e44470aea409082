//! Ingestion stage of the bedek pipeline.
//!
//! Takes a raw byte source from the upload collaborator and turns it into
//! structured [`Record`](bedek_common::Record)s: format detection, per-format
//! decoding, Hebrew/mixed-direction text normalization, and content hashing
//! for idempotent re-processing.
//!
//! One bad row never aborts a source; only an unreadable container or an
//! undetectable format is fatal.

pub mod decode;
pub mod format;
pub mod ingestor;
pub mod normalize;
pub mod source;

pub use decode::{decode, RecordReader};
pub use format::{detect_format, SourceFormat};
pub use ingestor::{IngestOutcome, Ingestor, IngestorConfig};
pub use normalize::{normalize_record, normalize_text};
pub use source::ByteSource;
