//! Shared foundation for the bedek pipeline crates.
//!
//! Building-inspection records flow through several stages (ingestion,
//! quality validation, stream processing); this crate holds what all of
//! them share:
//!
//! - **`record`**: the inspection record model — an ordered field map over a
//!   closed scalar variant, so downstream rules can match exhaustively
//! - **`hash`**: stable content hashing for file-level idempotency and
//!   business-key duplicate detection
//! - **`error`**: the pipeline error taxonomy
//! - **`logging`**: tracing subscriber setup shared by binaries

pub mod error;
pub mod hash;
pub mod logging;
pub mod record;

pub use error::{BedekError, Result};
pub use record::{FieldValue, Record};
