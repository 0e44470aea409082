//! The ingestion front door: detect, decode, normalize, hash.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use bedek_common::{hash, Record, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::decode::decode;
use crate::format::detect_format;
use crate::normalize::normalize_record;
use crate::source::ByteSource;

/// Row-failure messages kept on the outcome before summarizing the rest.
const MAX_ROW_WARNINGS: usize = 10;

#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// How many source content hashes the idempotency registry remembers.
    pub processed_capacity: usize,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            processed_capacity: 1024,
        }
    }
}

/// Result of ingesting one source.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub records: Vec<Record>,
    /// Rows that could not be decoded and were skipped.
    pub failed_rows: usize,
    pub warnings: Vec<String>,
    /// SHA-256 of the raw source bytes.
    pub content_hash: String,
    /// True when this exact content was ingested before.
    pub previously_processed: bool,
}

/// Decodes byte sources into normalized records.
///
/// Carries a bounded registry of content hashes so callers can recognize a
/// re-submitted file without consulting the persistence collaborator.
pub struct Ingestor {
    processed: Mutex<ProcessedFiles>,
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new(IngestorConfig::default())
    }
}

impl Ingestor {
    pub fn new(config: IngestorConfig) -> Self {
        Self {
            processed: Mutex::new(ProcessedFiles::new(config.processed_capacity)),
        }
    }

    /// Ingest one source end to end: detect the format, decode rows,
    /// normalize every text field, and report per-file identity.
    ///
    /// Malformed rows are counted and skipped; only an undetectable format
    /// or an unreadable container fails the whole source.
    pub fn ingest(&self, source: &ByteSource) -> Result<IngestOutcome> {
        let content_hash = hash::bytes_sha256(&mut &source.data[..])?;
        let previously_processed = self
            .processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&content_hash);

        let format = detect_format(source)?;
        let reader = decode(&source.data, format)?;

        let mut records = Vec::new();
        let mut failed_rows = 0usize;
        let mut warnings = Vec::new();

        for item in reader {
            match item {
                Ok(mut record) => {
                    normalize_record(&mut record);
                    records.push(record);
                }
                Err(err) => {
                    failed_rows += 1;
                    if warnings.len() < MAX_ROW_WARNINGS {
                        warnings.push(err.to_string());
                    }
                    debug!(error = %err, "skipping undecodable row");
                }
            }
        }
        if failed_rows > MAX_ROW_WARNINGS {
            warnings.push(format!(
                "{} more rows failed to decode",
                failed_rows - MAX_ROW_WARNINGS
            ));
        }

        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(content_hash.clone());

        info!(
            format = %format,
            records = records.len(),
            failed_rows,
            previously_processed,
            "source ingested"
        );

        Ok(IngestOutcome {
            records,
            failed_rows,
            warnings,
            content_hash,
            previously_processed,
        })
    }
}

/// Bounded FIFO set of content hashes.
struct ProcessedFiles {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl ProcessedFiles {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn contains(&self, hash: &str) -> bool {
        self.seen.contains(hash)
    }

    fn record(&mut self, hash: String) {
        if !self.seen.insert(hash.clone()) {
            return;
        }
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }
}
