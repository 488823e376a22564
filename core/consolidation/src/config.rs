use memory_ledger_schemas::{Category, DEFAULT_MAX_EVIDENCE};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

use crate::chunker::{DEFAULT_OVERLAP, PROMPT_OVERHEAD};

/// Thresholds and defaults for the merge-vs-create decision.
///
/// The similarity and confidence weights are protocol constants and are
/// deliberately absent here.
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Minimum combined similarity for a record to count as a match when the
    /// candidate's category has no entry in `category_thresholds`.
    pub similarity_threshold: f64,
    /// Best-match similarity at or above which a candidate is merged.
    pub auto_merge_threshold: f64,
    /// Evidence snippets kept per record after a merge.
    pub max_evidence: usize,
    /// Confidence given to a created record when the candidate has none.
    pub default_confidence: f64,
    pub category_thresholds: HashMap<Category, f64>,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        let category_thresholds = HashMap::from([
            (Category::Identity, 0.85),
            (Category::Preference, 0.75),
            (Category::Goal, 0.75),
            (Category::Skill, 0.8),
            (Category::Relationship, 0.85),
            (Category::Habit, 0.75),
            (Category::Belief, 0.8),
            (Category::Context, 0.7),
        ]);

        Self {
            similarity_threshold: 0.75,
            auto_merge_threshold: 0.85,
            max_evidence: DEFAULT_MAX_EVIDENCE,
            default_confidence: 0.8,
            category_thresholds,
        }
    }
}

impl ConsolidationConfig {
    /// Create config from environment variables, keeping defaults for
    /// anything unset or invalid
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            similarity_threshold: env_unit(
                "CONSOLIDATION_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            ),
            auto_merge_threshold: env_unit(
                "CONSOLIDATION_AUTO_MERGE_THRESHOLD",
                defaults.auto_merge_threshold,
            ),
            max_evidence: env_parse("CONSOLIDATION_MAX_EVIDENCE", defaults.max_evidence)
                .max(1),
            default_confidence: env_unit(
                "CONSOLIDATION_DEFAULT_CONFIDENCE",
                defaults.default_confidence,
            ),
            category_thresholds: defaults.category_thresholds,
        }
    }

    /// Match threshold for a candidate of the given category.
    pub fn threshold_for(&self, category: Option<Category>) -> f64 {
        category
            .and_then(|c| self.category_thresholds.get(&c).copied())
            .unwrap_or(self.similarity_threshold)
    }
}

/// Sizing for the document chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub overlap: usize,
    /// Characters reserved for the system prompt and output schema.
    pub prompt_overhead: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            overlap: DEFAULT_OVERLAP,
            prompt_overhead: PROMPT_OVERHEAD,
        }
    }
}

impl ChunkingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            overlap: env_parse("CHUNK_OVERLAP", defaults.overlap),
            prompt_overhead: env_parse("CHUNK_PROMPT_OVERHEAD", defaults.prompt_overhead),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid value for {}: {:?}", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_unit(name: &str, default: f64) -> f64 {
    let value = env_parse(name, default);
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        warn!("{} must be within [0, 1], got {}", name, value);
        default
    }
}
