//! ID-conflict detection and resolution across the six collections.
//!
//! Every rule is written once over [`Record`] and applied to each collection
//! in turn, so all six behave identically.

use memory_ledger_schemas::{Dataset, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStrategy {
    /// Imported collections replace the current ones wholesale.
    Replace,
    /// Keep current records and add new IDs; collisions follow the
    /// conflict resolution.
    #[default]
    Merge,
    /// Keep everything, re-identifying imported records whose IDs collide.
    Append,
}

impl fmt::Display for ImportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ImportStrategy::Replace => "replace",
            ImportStrategy::Merge => "merge",
            ImportStrategy::Append => "append",
        };
        f.write_str(name)
    }
}

/// Which side wins an ID collision under [`ImportStrategy::Merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    #[default]
    Old,
    New,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    pub strategy: ImportStrategy,
    pub conflict_resolution: ConflictResolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    DuplicateId,
}

/// An imported record whose ID already exists in the same collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub collection: String,
    pub id: String,
    pub existing: Value,
    pub incoming: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub added: usize,
    pub overwritten: usize,
    pub skipped: usize,
    /// Appended records that were given a fresh ID.
    pub reassigned: usize,
}

impl ImportStats {
    fn absorb(&mut self, other: ImportStats) {
        self.added += other.added;
        self.overwritten += other.overwritten;
        self.skipped += other.skipped;
        self.reassigned += other.reassigned;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportResult {
    pub dataset: Dataset,
    pub stats: ImportStats,
}

/// Conflicts for one collection, in imported order.
pub fn detect_collection_conflicts<T>(existing: &[T], imported: &[T]) -> Vec<ConflictRecord>
where
    T: Record + Serialize,
{
    let by_id: HashMap<&str, &T> = existing.iter().map(|r| (r.record_id(), r)).collect();

    imported
        .iter()
        .filter_map(|incoming| {
            let current = by_id.get(incoming.record_id())?;
            debug!("Conflict in {}: {}", T::COLLECTION, incoming.record_id());
            Some(ConflictRecord {
                kind: ConflictKind::DuplicateId,
                collection: T::COLLECTION.to_string(),
                id: incoming.record_id().to_string(),
                existing: serde_json::to_value(current).unwrap_or(Value::Null),
                incoming: serde_json::to_value(incoming).unwrap_or(Value::Null),
            })
        })
        .collect()
}

/// Flag every imported record whose ID already exists, across all six
/// collections. Nothing is resolved here.
pub fn detect_conflicts(existing: &Dataset, imported: &Dataset) -> Vec<ConflictRecord> {
    let mut conflicts = Vec::new();
    conflicts.extend(detect_collection_conflicts(&existing.memories, &imported.memories));
    conflicts.extend(detect_collection_conflicts(
        &existing.knowledge_items,
        &imported.knowledge_items,
    ));
    conflicts.extend(detect_collection_conflicts(&existing.sessions, &imported.sessions));
    conflicts.extend(detect_collection_conflicts(&existing.uploads, &imported.uploads));
    conflicts.extend(detect_collection_conflicts(&existing.proposals, &imported.proposals));
    conflicts.extend(detect_collection_conflicts(&existing.history, &imported.history));
    conflicts
}

/// Combine one collection according to `options`. Inputs are untouched.
pub fn apply_collection<T: Record>(
    current: &[T],
    imported: &[T],
    options: ImportOptions,
) -> (Vec<T>, ImportStats) {
    let mut stats = ImportStats::default();

    let records = match options.strategy {
        ImportStrategy::Replace => {
            stats.added = imported.len();
            imported.to_vec()
        }
        ImportStrategy::Merge => {
            let mut records = current.to_vec();
            let mut positions: HashMap<String, usize> = records
                .iter()
                .enumerate()
                .map(|(i, r)| (r.record_id().to_string(), i))
                .collect();

            for incoming in imported {
                match positions.get(incoming.record_id()) {
                    Some(&pos) => match options.conflict_resolution {
                        ConflictResolution::Old => stats.skipped += 1,
                        ConflictResolution::New => {
                            records[pos] = incoming.clone();
                            stats.overwritten += 1;
                        }
                    },
                    None => {
                        positions.insert(incoming.record_id().to_string(), records.len());
                        records.push(incoming.clone());
                        stats.added += 1;
                    }
                }
            }
            records
        }
        ImportStrategy::Append => {
            let mut records = current.to_vec();
            let mut ids: HashSet<String> = records.iter().map(|r| r.record_id().to_string()).collect();

            for incoming in imported {
                let mut record = incoming.clone();
                if ids.contains(record.record_id()) {
                    let mut fresh = T::generate_id();
                    while ids.contains(&fresh) {
                        fresh = T::generate_id();
                    }
                    debug!(
                        "Re-identified {} record {} as {}",
                        T::COLLECTION,
                        record.record_id(),
                        fresh
                    );
                    record.set_record_id(fresh);
                    stats.reassigned += 1;
                }
                ids.insert(record.record_id().to_string());
                records.push(record);
                stats.added += 1;
            }
            records
        }
    };

    (records, stats)
}

/// Combine all six collections according to `options`.
pub fn apply_import(current: &Dataset, imported: &Dataset, options: ImportOptions) -> ImportResult {
    let mut stats = ImportStats::default();
    let mut dataset = Dataset::default();

    macro_rules! apply {
        ($field:ident) => {{
            let (records, collection_stats) =
                apply_collection(&current.$field, &imported.$field, options);
            stats.absorb(collection_stats);
            dataset.$field = records;
        }};
    }

    apply!(memories);
    apply!(knowledge_items);
    apply!(sessions);
    apply!(uploads);
    apply!(proposals);
    apply!(history);

    info!(
        "Applied {} import: {} added, {} overwritten, {} skipped, {} reassigned",
        options.strategy, stats.added, stats.overwritten, stats.skipped, stats.reassigned
    );
    ImportResult { dataset, stats }
}
