//! Splitting long documents into overlapping chunks sized for a model's
//! context window, and merging per-chunk extraction results back together.
//!
//! All sizes and indices count chars, not bytes.

use memory_ledger_schemas::{RawCandidate, TextChunk};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::config::ChunkingConfig;

/// Chars reserved for the extraction prompt and output schema.
pub const PROMPT_OVERHEAD: usize = 3000;
pub const DEFAULT_OVERLAP: usize = 500;
/// Floor for the usable chunk size, however small the model budget.
pub const MIN_EFFECTIVE_SIZE: usize = 100;
/// Budget for models no rule recognises.
pub const DEFAULT_MODEL_BUDGET: usize = 20_000;

// Exact model names, checked before any pattern.
const EXACT_BUDGETS: &[(&str, usize)] = &[
    ("gpt-4o", 120_000),
    ("gpt-4o-mini", 120_000),
    ("gpt-4-turbo", 120_000),
    ("gpt-4", 24_000),
    ("gpt-3.5-turbo", 48_000),
];

#[derive(Debug, Clone, Copy)]
enum ModelPattern {
    Prefix(&'static str),
    Contains(&'static str),
}

impl ModelPattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            ModelPattern::Prefix(p) => name.starts_with(p),
            ModelPattern::Contains(p) => name.contains(p),
        }
    }
}

// First match wins, so more specific patterns come first.
const PATTERN_BUDGETS: &[(ModelPattern, usize)] = &[
    (ModelPattern::Prefix("gpt-4o"), 120_000),
    (ModelPattern::Prefix("gpt-4.1"), 400_000),
    (ModelPattern::Prefix("gpt-4-turbo"), 120_000),
    (ModelPattern::Prefix("gpt-4"), 24_000),
    (ModelPattern::Prefix("gpt-3.5"), 48_000),
    (ModelPattern::Contains("claude"), 180_000),
    (ModelPattern::Contains("gemini"), 400_000),
    (ModelPattern::Contains("llama3"), 24_000),
    (ModelPattern::Contains("llama"), 12_000),
    (ModelPattern::Contains("mistral"), 96_000),
    (ModelPattern::Contains("qwen"), 96_000),
    (ModelPattern::Contains("phi"), 12_000),
];

/// Maximum chunk size in chars for a model name.
pub fn model_budget(model: &str) -> usize {
    let name = model.trim().to_lowercase();

    if let Some((_, budget)) = EXACT_BUDGETS.iter().find(|(n, _)| *n == name) {
        return *budget;
    }

    PATTERN_BUDGETS
        .iter()
        .find(|(pattern, _)| pattern.matches(&name))
        .map_or(DEFAULT_MODEL_BUDGET, |(_, budget)| *budget)
}

/// Whether `text` exceeds what one extraction call for `model` can take.
pub fn should_chunk(text: &str, model: &str) -> bool {
    text.chars().count() > effective_size(model_budget(model), PROMPT_OVERHEAD)
}

/// Split `text` into overlapping chunks of at most
/// `max(100, max_chunk_size - 3000)` chars.
pub fn chunk_text(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    split(text, max_chunk_size, overlap, PROMPT_OVERHEAD)
}

/// Model-aware chunking with a configurable overlap and prompt overhead.
#[derive(Debug, Clone, Default)]
pub struct DocumentChunker {
    config: ChunkingConfig,
}

impl DocumentChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn should_chunk(&self, text: &str, model: &str) -> bool {
        text.chars().count() > effective_size(model_budget(model), self.config.prompt_overhead)
    }

    pub fn chunk(&self, text: &str, model: &str) -> Vec<TextChunk> {
        self.chunk_with_size(text, model_budget(model))
    }

    pub fn chunk_with_size(&self, text: &str, max_chunk_size: usize) -> Vec<TextChunk> {
        split(
            text,
            max_chunk_size,
            self.config.overlap,
            self.config.prompt_overhead,
        )
    }
}

fn effective_size(max_chunk_size: usize, prompt_overhead: usize) -> usize {
    max_chunk_size
        .saturating_sub(prompt_overhead)
        .max(MIN_EFFECTIVE_SIZE)
}

fn split(text: &str, max_chunk_size: usize, overlap: usize, prompt_overhead: usize) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let size = effective_size(max_chunk_size, prompt_overhead);

    if total <= size {
        return vec![TextChunk {
            text: text.to_string(),
            start_index: 0,
            end_index: total,
            chunk_index: 0,
        }];
    }

    let overlap = overlap.min(size / 10);
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let hard_end = (start + size).min(total);
        let end = if hard_end == total {
            total
        } else {
            find_boundary(&chars, start, hard_end, size)
        };

        chunks.push(TextChunk {
            text: chars[start..end].iter().collect(),
            start_index: start,
            end_index: end,
            chunk_index: chunks.len(),
        });

        if end >= total {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    debug!(
        "Split {} chars into {} chunks (size {}, overlap {})",
        total,
        chunks.len(),
        size,
        overlap
    );
    chunks
}

/// Exclusive end for a chunk starting at `start`, preferring a paragraph
/// break in the back half, then a line break in the back half, then a
/// sentence end in the last 30%, then the hard cut.
fn find_boundary(chars: &[char], start: usize, hard_end: usize, size: usize) -> usize {
    let half = start + size / 2;
    let seventy = start + size * 7 / 10;

    if let Some(i) = (half..hard_end.saturating_sub(1))
        .rev()
        .find(|&i| chars[i] == '\n' && chars[i + 1] == '\n')
    {
        return i + 2;
    }

    if let Some(i) = (half..hard_end).rev().find(|&i| chars[i] == '\n') {
        return i + 1;
    }

    if let Some(i) = (seventy..hard_end).rev().find(|&i| {
        matches!(chars[i], '.' | '!' | '?') && chars.get(i + 1).map_or(true, |c| c.is_whitespace())
    }) {
        return i + 1;
    }

    hard_end
}

/// An extracted item with a text identity used for cross-chunk dedup.
pub trait ExtractedItem {
    /// `content`, else `title`.
    fn identity_text(&self) -> Option<&str>;
}

impl ExtractedItem for RawCandidate {
    fn identity_text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or(self.title.as_deref())
    }
}

impl ExtractedItem for serde_json::Value {
    fn identity_text(&self) -> Option<&str> {
        self.get("content")
            .and_then(|v| v.as_str())
            .filter(|c| !c.trim().is_empty())
            .or_else(|| self.get("title").and_then(|v| v.as_str()))
    }
}

/// Concatenate per-chunk results in order, dropping missing items, items
/// without identity text, and repeats of an earlier identity
/// (trimmed, case-insensitive).
pub fn merge_extraction_results<T>(per_chunk: &[Vec<Option<T>>]) -> Vec<T>
where
    T: ExtractedItem + Clone,
{
    let mut seen = HashSet::new();
    per_chunk
        .iter()
        .flatten()
        .filter_map(Option::as_ref)
        .filter(|item| match identity_key(*item) {
            Some(key) => seen.insert(key),
            None => false,
        })
        .cloned()
        .collect()
}

fn identity_key<T: ExtractedItem>(item: &T) -> Option<String> {
    let text = item.identity_text()?.trim();
    (!text.is_empty()).then(|| text.to_lowercase())
}

/// Items extracted from one chunk, tagged with its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult<T> {
    pub chunk_index: usize,
    #[serde(default = "Vec::new")]
    pub items: Vec<Option<T>>,
}

/// `merge_extraction_results` for results that may arrive out of order.
pub fn merge_chunk_results<T>(mut results: Vec<ChunkResult<T>>) -> Vec<T>
where
    T: ExtractedItem + Clone,
{
    results.sort_by_key(|r| r.chunk_index);
    let per_chunk: Vec<Vec<Option<T>>> = results.into_iter().map(|r| r.items).collect();
    merge_extraction_results(&per_chunk)
}
