use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// ULID and ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KnowledgeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditId(pub String);

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for KnowledgeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AuditId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Memory Record Schema
// ============================================================================

/// Lowest stability tier (fleeting observation).
pub const MIN_LAYER: u8 = 0;
/// Highest stability tier (core identity).
pub const MAX_LAYER: u8 = 4;
/// Evidence snippets kept per record.
pub const DEFAULT_MAX_EVIDENCE: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub content: String,
    pub category: Category,
    pub layer: u8,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub status: MemoryStatus,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
    #[serde(default)]
    pub confirmed_by_human: bool,
}

impl MemoryRecord {
    pub fn is_active(&self) -> bool {
        self.status == MemoryStatus::Active
    }

    /// Returns a copy with confidence, layer and evidence brought back into range.
    pub fn normalized(&self, max_evidence: usize) -> Self {
        let mut record = self.clone();
        record.confidence = clamp_unit(record.confidence, 0.5);
        record.layer = record.layer.min(MAX_LAYER);
        record.evidence = dedup_evidence(record.evidence, max_evidence);
        record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "identity")]
    Identity,
    #[serde(rename = "preference")]
    Preference,
    #[serde(rename = "goal")]
    Goal,
    #[serde(rename = "skill")]
    Skill,
    #[serde(rename = "relationship")]
    Relationship,
    #[serde(rename = "habit")]
    Habit,
    #[serde(rename = "belief")]
    Belief,
    #[serde(rename = "context")]
    Context,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Identity,
        Category::Preference,
        Category::Goal,
        Category::Skill,
        Category::Relationship,
        Category::Habit,
        Category::Belief,
        Category::Context,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Identity => "identity",
            Category::Preference => "preference",
            Category::Goal => "goal",
            Category::Skill => "skill",
            Category::Relationship => "relationship",
            Category::Habit => "habit",
            Category::Belief => "belief",
            Category::Context => "context",
        }
    }

    /// Case-insensitive lookup; `None` for names outside the fixed set.
    pub fn parse(name: &str) -> Option<Self> {
        let wanted = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == wanted)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "archived")]
    Archived,
    #[serde(rename = "superseded")]
    Superseded,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Archived => "archived",
            MemoryStatus::Superseded => "superseded",
        }
    }
}

// ============================================================================
// Candidate Insight Schema
// ============================================================================

/// Raw candidate exactly as the extraction collaborator hands it over.
/// Nothing here is trusted: numbers may be out of range and the category
/// may name something outside the fixed set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCandidate {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub layer: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub evidence_strength: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub quality_indicators: Option<QualityIndicators>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityIndicators {
    #[serde(default)]
    pub generalization: Option<f64>,
    #[serde(default)]
    pub consistency: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInsight {
    pub summary: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    pub proposed_record: ProposedRecord,
    #[serde(default)]
    pub evidence_context: Vec<String>,
    pub confidence: f64,
    pub quality_score: f64,
    pub evidence_strength: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_matches: Option<Vec<SimilarityMatch>>,
}

/// The subset of a `MemoryRecord` a candidate proposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedRecord {
    pub content: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub layer: Option<u8>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityMatch {
    pub record_id: MemoryId,
    pub similarity: f64,
    pub reason: MatchReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchReason {
    #[serde(rename = "near-duplicate")]
    NearDuplicate,
    #[serde(rename = "recommend merge")]
    RecommendMerge,
    #[serde(rename = "moderate — review")]
    Review,
}

impl MatchReason {
    /// Band a similarity score into a review hint.
    pub fn for_similarity(similarity: f64) -> Self {
        if similarity >= 0.9 {
            MatchReason::NearDuplicate
        } else if similarity >= 0.8 {
            MatchReason::RecommendMerge
        } else {
            MatchReason::Review
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::NearDuplicate => "near-duplicate",
            MatchReason::RecommendMerge => "recommend merge",
            MatchReason::Review => "moderate — review",
        }
    }
}

// ============================================================================
// Document Chunk Schema
// ============================================================================

/// A slice of a source text. Indices count chars, `end_index` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChunk {
    pub text: String,
    pub start_index: usize,
    pub end_index: usize,
    pub chunk_index: usize,
}

// ============================================================================
// Knowledge, Session, Upload, Proposal and History Schemas
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    pub id: KnowledgeId,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub started_at: String, // RFC3339
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: UploadId,
    pub file_name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub uploaded_at: String, // RFC3339
    pub status: UploadStatus,
    #[serde(default)]
    pub extracted_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "processed")]
    Processed,
    #[serde(rename = "failed")]
    Failed,
}

/// A candidate waiting for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: ProposalId,
    pub insight: CandidateInsight,
    pub status: ProposalStatus,
    pub created_at: String, // RFC3339
    #[serde(default)]
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "approved")]
    Approved,
    #[serde(rename = "rejected")]
    Rejected,
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: AuditId,
    pub timestamp: String, // RFC3339
    pub change_description: String,
    #[serde(default)]
    pub affected_record_ids: Vec<String>,
    #[serde(rename = "type")]
    pub entry_type: AuditType,
}

impl AuditEntry {
    pub fn new(entry_type: AuditType, change_description: String, affected: Vec<String>) -> Self {
        Self {
            id: generate_audit_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            change_description,
            affected_record_ids: affected,
            entry_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditType {
    #[serde(rename = "CONSOLIDATION")]
    Consolidation,
    #[serde(rename = "IMPORT_SYNC")]
    ImportSync,
    #[serde(rename = "MANUAL_OVERRIDE")]
    ManualOverride,
}

// ============================================================================
// Dataset and Backup Envelope
// ============================================================================

/// The six independent collections making up a user's data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub memories: Vec<MemoryRecord>,
    pub knowledge_items: Vec<KnowledgeItem>,
    pub sessions: Vec<Session>,
    pub uploads: Vec<Upload>,
    pub proposals: Vec<Proposal>,
    pub history: Vec<AuditEntry>,
}

impl Dataset {
    /// Field names of the six collections, in wire order.
    pub const COLLECTIONS: [&'static str; 6] = [
        "memories",
        "knowledgeItems",
        "sessions",
        "uploads",
        "proposals",
        "history",
    ];

    pub fn item_counts(&self) -> ItemCounts {
        ItemCounts {
            memories: self.memories.len(),
            knowledge_items: self.knowledge_items.len(),
            sessions: self.sessions.len(),
            uploads: self.uploads.len(),
            proposals: self.proposals.len(),
            history: self.history.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCounts {
    pub memories: usize,
    pub knowledge_items: usize,
    pub sessions: usize,
    pub uploads: usize,
    pub proposals: usize,
    pub history: usize,
}

impl ItemCounts {
    pub fn total(&self) -> usize {
        self.memories
            + self.knowledge_items
            + self.sessions
            + self.uploads
            + self.proposals
            + self.history
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub version: String,
    pub export_date: String, // RFC3339
    pub app_version: String,
    pub data_size: u64,
    pub item_counts: ItemCounts,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupPackage {
    pub metadata: BackupMetadata,
    pub data: Dataset,
}

// ============================================================================
// Keyed Records
// ============================================================================

/// A record living in one of the six collections, keyed by a string ID
/// unique within that collection.
pub trait Record: Clone {
    /// Wire name of the owning collection.
    const COLLECTION: &'static str;

    fn record_id(&self) -> &str;

    fn set_record_id(&mut self, id: String);

    /// A fresh, prefixed ID for this collection.
    fn generate_id() -> String;
}

impl Record for MemoryRecord {
    const COLLECTION: &'static str = "memories";

    fn record_id(&self) -> &str {
        &self.id.0
    }

    fn set_record_id(&mut self, id: String) {
        self.id = MemoryId(id);
    }

    fn generate_id() -> String {
        generate_memory_id().0
    }
}

impl Record for KnowledgeItem {
    const COLLECTION: &'static str = "knowledgeItems";

    fn record_id(&self) -> &str {
        &self.id.0
    }

    fn set_record_id(&mut self, id: String) {
        self.id = KnowledgeId(id);
    }

    fn generate_id() -> String {
        generate_knowledge_id().0
    }
}

impl Record for Session {
    const COLLECTION: &'static str = "sessions";

    fn record_id(&self) -> &str {
        &self.id.0
    }

    fn set_record_id(&mut self, id: String) {
        self.id = SessionId(id);
    }

    fn generate_id() -> String {
        generate_session_id().0
    }
}

impl Record for Upload {
    const COLLECTION: &'static str = "uploads";

    fn record_id(&self) -> &str {
        &self.id.0
    }

    fn set_record_id(&mut self, id: String) {
        self.id = UploadId(id);
    }

    fn generate_id() -> String {
        generate_upload_id().0
    }
}

impl Record for Proposal {
    const COLLECTION: &'static str = "proposals";

    fn record_id(&self) -> &str {
        &self.id.0
    }

    fn set_record_id(&mut self, id: String) {
        self.id = ProposalId(id);
    }

    fn generate_id() -> String {
        generate_proposal_id().0
    }
}

impl Record for AuditEntry {
    const COLLECTION: &'static str = "history";

    fn record_id(&self) -> &str {
        &self.id.0
    }

    fn set_record_id(&mut self, id: String) {
        self.id = AuditId(id);
    }

    fn generate_id() -> String {
        generate_audit_id().0
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn generate_memory_id() -> MemoryId {
    MemoryId(format!("mem_{}", ulid::Ulid::new()))
}

pub fn generate_knowledge_id() -> KnowledgeId {
    KnowledgeId(format!("kn_{}", ulid::Ulid::new()))
}

pub fn generate_session_id() -> SessionId {
    SessionId(format!("ses_{}", ulid::Ulid::new()))
}

pub fn generate_upload_id() -> UploadId {
    UploadId(format!("upl_{}", ulid::Ulid::new()))
}

pub fn generate_proposal_id() -> ProposalId {
    ProposalId(format!("prop_{}", ulid::Ulid::new()))
}

pub fn generate_audit_id() -> AuditId {
    AuditId(format!("hist_{}", ulid::Ulid::new()))
}

/// Clamp into [0, 1]; NaN and infinities become `fallback`.
pub fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// Trim, drop blanks, drop case-insensitive repeats (first occurrence wins)
/// and keep the most recent `cap` snippets.
pub fn dedup_evidence<I>(items: I, cap: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut kept: Vec<String> = items
        .into_iter()
        .filter_map(|item| {
            let trimmed = item.trim();
            if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
                return None;
            }
            Some(trimmed.to_string())
        })
        .collect();

    if kept.len() > cap {
        kept.drain(..kept.len() - cap);
    }
    kept
}
