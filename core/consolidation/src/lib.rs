pub mod candidate;
pub mod chunker;
pub mod config;
pub mod error;
pub mod extraction;
pub mod quality;
pub mod resolver;
pub mod service;
pub mod similarity;

pub use candidate::{build_candidate, build_candidates};
pub use chunker::{
    chunk_text, merge_chunk_results, merge_extraction_results, model_budget, should_chunk,
    ChunkResult, DocumentChunker, ExtractedItem,
};
pub use config::{ChunkingConfig, ConsolidationConfig};
pub use error::{Error, Result};
pub use extraction::{
    extract_document, ExtractionGate, ExtractionPermit, ExtractionProvider, ExtractionReport,
};
pub use quality::quality_score;
pub use resolver::{
    find_similar, merged_confidence, Approval, BatchOutcome, ConsolidationAction,
    ConsolidationOutcome, Consolidator, Rejection, Triage,
};
pub use service::{router, AppState};
pub use similarity::{breakdown, combined, combined_opt, cosine, jaccard, levenshtein, SimilarityBreakdown};
