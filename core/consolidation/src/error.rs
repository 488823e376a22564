//! Consolidation error types

use memory_ledger_schemas::{MemoryId, ProposalId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Another extraction holds the single-flight gate
    #[error("Extraction already in progress")]
    ExtractionInProgress,

    /// The extraction collaborator failed for a chunk
    #[error("Extraction provider error: {0}")]
    Provider(String),

    /// A reviewer picked a merge target that is missing or inactive
    #[error("Unknown merge target: {0}")]
    UnknownTarget(MemoryId),

    /// The proposal was already approved or rejected
    #[error("Proposal {0} is not pending")]
    ProposalNotPending(ProposalId),
}

pub type Result<T> = std::result::Result<T, Error>;
