//! Stateless HTTP surface over the consolidation primitives.
//!
//! The service owns no records. Callers send the existing memories with each
//! request and persist whatever comes back.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use memory_ledger_schemas::{MemoryRecord, RawCandidate, TextChunk};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::candidate::build_candidate;
use crate::chunker::{merge_chunk_results, model_budget, ChunkResult, DocumentChunker};
use crate::config::{ChunkingConfig, ConsolidationConfig};
use crate::resolver::{BatchOutcome, Consolidator, Triage};
use crate::similarity::{breakdown, SimilarityBreakdown};

pub const DEFAULT_ADDR: &str = "127.0.0.1:21956";

#[derive(Clone)]
pub struct AppState {
    consolidator: Arc<Consolidator>,
    chunker: Arc<DocumentChunker>,
}

impl AppState {
    pub fn new(config: ConsolidationConfig, chunking: ChunkingConfig) -> Self {
        Self {
            consolidator: Arc::new(Consolidator::new(config)),
            chunker: Arc::new(DocumentChunker::new(chunking)),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ConsolidationConfig::default(), ChunkingConfig::default())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/similarity", post(similarity))
        .route("/v1/consolidate", post(consolidate))
        .route("/v1/triage", post(triage))
        .route("/v1/chunk", post(chunk))
        .route("/v1/extractions/merge", post(merge_extractions))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "consolidation",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
struct SimilarityRequest {
    #[serde(default)]
    a: Option<String>,
    #[serde(default)]
    b: Option<String>,
}

async fn similarity(Json(req): Json<SimilarityRequest>) -> Json<SimilarityBreakdown> {
    Json(breakdown(
        req.a.as_deref().unwrap_or(""),
        req.b.as_deref().unwrap_or(""),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsolidateRequest {
    #[serde(default)]
    candidates: Vec<Option<RawCandidate>>,
    #[serde(default)]
    evidence_context: Vec<String>,
    #[serde(default)]
    existing: Vec<Option<MemoryRecord>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsolidateResponse {
    #[serde(flatten)]
    batch: BatchOutcome,
    skipped: usize,
}

async fn consolidate(
    State(state): State<AppState>,
    Json(req): Json<ConsolidateRequest>,
) -> Json<ConsolidateResponse> {
    let received = req.candidates.len();
    let candidates: Vec<_> = req
        .candidates
        .iter()
        .flatten()
        .filter_map(|raw| build_candidate(raw, &req.evidence_context))
        .collect();
    let skipped = received - candidates.len();
    if skipped > 0 {
        warn!("Skipped {} unusable candidates", skipped);
    }

    let existing = normalize_existing(&state, req.existing);
    let batch = state.consolidator.consolidate_batch(&candidates, &existing);
    Json(ConsolidateResponse { batch, skipped })
}

/// Drops null entries and pulls every record back into range.
fn normalize_existing(state: &AppState, existing: Vec<Option<MemoryRecord>>) -> Vec<MemoryRecord> {
    let max_evidence = state.consolidator.config().max_evidence;
    existing
        .into_iter()
        .flatten()
        .map(|r| r.normalized(max_evidence))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriageRequest {
    candidate: RawCandidate,
    #[serde(default)]
    evidence_context: Vec<String>,
    #[serde(default)]
    existing: Vec<Option<MemoryRecord>>,
}

async fn triage(
    State(state): State<AppState>,
    Json(req): Json<TriageRequest>,
) -> Result<Json<Triage>, (StatusCode, String)> {
    let candidate = build_candidate(&req.candidate, &req.evidence_context).ok_or((
        StatusCode::UNPROCESSABLE_ENTITY,
        "candidate has neither content nor title".to_string(),
    ))?;

    let existing = normalize_existing(&state, req.existing);
    let decision = state.consolidator.triage(&candidate, &existing);
    if let Triage::Queued(proposal) = &decision {
        info!("Queued proposal {} for review", proposal.id);
    }
    Ok(Json(decision))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkRequest {
    text: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    max_chunk_size: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkResponse {
    should_chunk: bool,
    max_chunk_size: usize,
    chunks: Vec<TextChunk>,
}

async fn chunk(State(state): State<AppState>, Json(req): Json<ChunkRequest>) -> Json<ChunkResponse> {
    let model = req.model.as_deref().unwrap_or_default();
    let max_chunk_size = req.max_chunk_size.unwrap_or_else(|| model_budget(model));
    let chunks = state.chunker.chunk_with_size(&req.text, max_chunk_size);

    Json(ChunkResponse {
        should_chunk: chunks.len() > 1,
        max_chunk_size,
        chunks,
    })
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    #[serde(default)]
    chunks: Vec<ChunkResult<serde_json::Value>>,
}

async fn merge_extractions(Json(req): Json<MergeRequest>) -> impl IntoResponse {
    let items = merge_chunk_results(req.chunks);
    Json(serde_json::json!({
        "count": items.len(),
        "items": items,
    }))
}
