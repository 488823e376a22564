//! Document extraction driven through a pluggable provider.
//!
//! Only one extraction may run at a time. Callers take an
//! [`ExtractionPermit`] from the shared [`ExtractionGate`] first; a second
//! attempt while the permit is held fails fast with
//! [`Error::ExtractionInProgress`].

use async_trait::async_trait;
use memory_ledger_schemas::{RawCandidate, TextChunk};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::chunker::{merge_extraction_results, DocumentChunker};
use crate::error::{Error, Result};

/// Produces raw candidates for one chunk of text. Entries may be `None`
/// when the provider emitted something it could not parse.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    async fn extract(&self, chunk: &TextChunk, model: &str) -> Result<Vec<Option<RawCandidate>>>;
}

/// Single-flight guard shared by everything that can start an extraction.
#[derive(Debug, Clone)]
pub struct ExtractionGate {
    semaphore: Arc<Semaphore>,
}

impl Default for ExtractionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionGate {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Claim the gate, or fail immediately if an extraction is running.
    pub fn try_begin(&self) -> Result<ExtractionPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .map(|permit| ExtractionPermit { _permit: permit })
            .map_err(|_| Error::ExtractionInProgress)
    }

    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

/// Proof that the caller holds the gate. Dropping it releases the gate.
#[derive(Debug)]
pub struct ExtractionPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionReport {
    /// Merged, de-duplicated candidates in chunk order.
    pub candidates: Vec<RawCandidate>,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
}

/// Chunk `text` for `model`, run the provider over each chunk in order and
/// merge the results. A failing chunk is logged and skipped.
pub async fn extract_document<P>(
    provider: &P,
    _permit: &ExtractionPermit,
    chunker: &DocumentChunker,
    text: &str,
    model: &str,
) -> ExtractionReport
where
    P: ExtractionProvider + ?Sized,
{
    let chunks = chunker.chunk(text, model);
    let total = chunks.len();
    let mut per_chunk = Vec::with_capacity(total);
    let mut report = ExtractionReport::default();

    for chunk in &chunks {
        match provider.extract(chunk, model).await {
            Ok(items) => {
                report.chunks_processed += 1;
                per_chunk.push(items);
            }
            Err(e) => {
                report.chunks_failed += 1;
                warn!(
                    "Extraction failed for chunk {}/{}: {}",
                    chunk.chunk_index + 1,
                    total,
                    e
                );
            }
        }
    }

    report.candidates = merge_extraction_results(&per_chunk);

    info!(
        "Extracted {} candidates from {} chunks ({} failed)",
        report.candidates.len(),
        total,
        report.chunks_failed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_is_single_flight() {
        let gate = ExtractionGate::new();
        assert!(!gate.is_busy());

        let permit = gate.try_begin().unwrap();
        assert!(gate.is_busy());
        assert!(matches!(gate.clone().try_begin(), Err(Error::ExtractionInProgress)));

        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_begin().is_ok());
    }
}
