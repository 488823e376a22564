//! Backup export, validation and import.
//!
//! The checksum is the SHA-256 hex digest of the compact JSON serialization
//! of the `data` section, and `dataSize` is that serialization's length in
//! bytes.

use chrono::Utc;
use memory_ledger_schemas::{
    AuditEntry, AuditType, BackupMetadata, BackupPackage, Category, Dataset, MAX_LAYER,
};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::reconcile::{apply_import, detect_conflicts, ConflictRecord, ImportOptions, ImportStats};

pub const BACKUP_VERSION: &str = "1.0";

const MEMORY_STATUSES: &[&str] = &["active", "archived", "superseded"];
const UPLOAD_STATUSES: &[&str] = &["pending", "processed", "failed"];
const PROPOSAL_STATUSES: &[&str] = &["pending", "approved", "rejected"];
const AUDIT_TYPES: &[&str] = &["CONSOLIDATION", "IMPORT_SYNC", "MANUAL_OVERRIDE"];

pub fn compute_checksum(data: &Dataset) -> Result<String, serde_json::Error> {
    let body = serde_json::to_string(data)?;
    Ok(sha256_hex(body.as_bytes()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Wrap a dataset in a backup envelope.
pub fn export_backup(dataset: &Dataset, app_version: &str) -> Result<BackupPackage, serde_json::Error> {
    let body = serde_json::to_string(dataset)?;
    let metadata = BackupMetadata {
        version: BACKUP_VERSION.to_string(),
        export_date: Utc::now().to_rfc3339(),
        app_version: app_version.to_string(),
        data_size: body.len() as u64,
        item_counts: dataset.item_counts(),
        checksum: sha256_hex(body.as_bytes()),
    };

    info!(
        "Exported {} records ({} bytes)",
        metadata.item_counts.total(),
        metadata.data_size
    );
    Ok(BackupPackage {
        metadata,
        data: dataset.clone(),
    })
}

/// Outcome of checking a backup file. Never an error: problems are listed
/// as field-scoped messages.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportValidation {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub package: Option<BackupPackage>,
}

impl ImportValidation {
    fn failed(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            warnings,
            package: None,
        }
    }
}

pub fn validate_backup(json_text: &str) -> ImportValidation {
    let root: Value = match serde_json::from_str(json_text) {
        Ok(value) => value,
        Err(e) => return ImportValidation::failed(vec![format!("invalid JSON: {}", e)], vec![]),
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(root) = root.as_object() else {
        return ImportValidation::failed(vec!["backup: expected an object".to_string()], warnings);
    };

    match root.get("metadata").and_then(Value::as_object) {
        Some(metadata) => check_metadata(metadata, &mut errors, &mut warnings),
        None => errors.push("metadata: missing".to_string()),
    }

    match root.get("data").and_then(Value::as_object) {
        Some(data) => check_data(data, &mut errors),
        None => errors.push("data: missing".to_string()),
    }

    if !errors.is_empty() {
        warn!("Backup failed validation with {} errors", errors.len());
        return ImportValidation::failed(errors, warnings);
    }

    let package: BackupPackage = match serde_json::from_value(Value::Object(root.clone())) {
        Ok(package) => package,
        Err(e) => return ImportValidation::failed(vec![format!("backup: {}", e)], warnings),
    };

    match compute_checksum(&package.data) {
        Ok(checksum) if checksum == package.metadata.checksum => {}
        Ok(_) => warnings.push("metadata.checksum: does not match data".to_string()),
        Err(e) => warnings.push(format!("metadata.checksum: could not be computed: {}", e)),
    }

    if package.metadata.item_counts != package.data.item_counts() {
        warnings.push("metadata.itemCounts: does not match data".to_string());
    }

    for warning in &warnings {
        warn!("Backup warning: {}", warning);
    }

    ImportValidation {
        success: true,
        errors,
        warnings,
        package: Some(package),
    }
}

fn check_metadata(metadata: &Map<String, Value>, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let mut check = FieldCheck::new("metadata", metadata, errors);
    check.string("version");
    check.string("exportDate");
    check.string("appVersion");
    check.string("checksum");
    check.integer("dataSize", 0, u64::MAX);
    check.object("itemCounts");

    if let Some(counts) = metadata.get("itemCounts").and_then(Value::as_object) {
        let mut check = FieldCheck::new("metadata.itemCounts", counts, errors);
        for collection in Dataset::COLLECTIONS {
            check.integer(collection, 0, u64::MAX);
        }
    }

    if let Some(version) = metadata.get("version").and_then(Value::as_str) {
        if version != BACKUP_VERSION {
            warnings.push(format!(
                "metadata.version: {} differs from supported {}",
                version, BACKUP_VERSION
            ));
        }
    }
}

fn check_data(data: &Map<String, Value>, errors: &mut Vec<String>) {
    for collection in Dataset::COLLECTIONS {
        let items = match data.get(collection) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                errors.push(format!("data.{}: expected an array", collection));
                continue;
            }
            None => {
                errors.push(format!("data.{}: missing", collection));
                continue;
            }
        };

        for (index, item) in items.iter().enumerate() {
            let path = format!("data.{}[{}]", collection, index);
            let Some(fields) = item.as_object() else {
                errors.push(format!("{}: expected an object", path));
                continue;
            };
            check_item(collection, &path, fields, errors);
        }
    }
}

fn check_item(collection: &str, path: &str, fields: &Map<String, Value>, errors: &mut Vec<String>) {
    let mut check = FieldCheck::new(path, fields, errors);
    check.string("id");

    match collection {
        "memories" => {
            check.string("content");
            check.one_of("category", &Category::ALL.map(|c| c.as_str()));
            check.integer("layer", 0, u64::from(MAX_LAYER));
            check.unit("confidence");
            check.one_of("status", MEMORY_STATUSES);
            check.string("createdAt");
            check.string("updatedAt");
            check.optional_string_array("evidence");
            check.optional_bool("confirmedByHuman");
        }
        "knowledgeItems" => {
            check.string("title");
            check.string("content");
            check.string("createdAt");
            check.string("updatedAt");
            check.optional_string_array("tags");
        }
        "sessions" => {
            check.string("title");
            check.string("startedAt");
            check.optional_integer("messageCount", 0, u64::from(u32::MAX));
        }
        "uploads" => {
            check.string("fileName");
            check.string("uploadedAt");
            check.integer("sizeBytes", 0, u64::MAX);
            check.one_of("status", UPLOAD_STATUSES);
            check.optional_integer("extractedCount", 0, u64::from(u32::MAX));
        }
        "proposals" => {
            check.one_of("status", PROPOSAL_STATUSES);
            check.string("createdAt");
            if check.object("insight") {
                if let Some(insight) = fields.get("insight").and_then(Value::as_object) {
                    let insight_path = format!("{}.insight", path);
                    let mut nested = FieldCheck::new(&insight_path, insight, check.errors);
                    nested.string("summary");
                    nested.unit("confidence");
                    nested.unit("qualityScore");
                    nested.unit("evidenceStrength");
                    if nested.object("proposedRecord") {
                        if let Some(proposed) = insight.get("proposedRecord").and_then(Value::as_object) {
                            let proposed_path = format!("{}.proposedRecord", insight_path);
                            let mut record = FieldCheck::new(&proposed_path, proposed, nested.errors);
                            record.string("content");
                            record.optional_integer("layer", 0, u64::from(MAX_LAYER));
                        }
                    }
                }
            }
        }
        "history" => {
            check.string("timestamp");
            check.string("changeDescription");
            check.one_of("type", AUDIT_TYPES);
            check.optional_string_array("affectedRecordIds");
        }
        _ => {}
    }
}

/// Per-object field checks that append `path.field: problem` messages.
struct FieldCheck<'a> {
    path: &'a str,
    fields: &'a Map<String, Value>,
    errors: &'a mut Vec<String>,
}

impl<'a> FieldCheck<'a> {
    fn new(path: &'a str, fields: &'a Map<String, Value>, errors: &'a mut Vec<String>) -> Self {
        Self {
            path,
            fields,
            errors,
        }
    }

    fn fail(&mut self, field: &str, problem: &str) -> bool {
        self.errors.push(format!("{}.{}: {}", self.path, field, problem));
        false
    }

    fn present(&mut self, field: &str) -> Option<&'a Value> {
        let value = self.fields.get(field).filter(|v| !v.is_null());
        if value.is_none() {
            self.fail(field, "missing");
        }
        value
    }

    fn string(&mut self, field: &str) -> bool {
        match self.present(field) {
            Some(Value::String(_)) => true,
            Some(_) => self.fail(field, "expected a string"),
            None => false,
        }
    }

    fn object(&mut self, field: &str) -> bool {
        match self.present(field) {
            Some(Value::Object(_)) => true,
            Some(_) => self.fail(field, "expected an object"),
            None => false,
        }
    }

    fn one_of(&mut self, field: &str, allowed: &[&str]) -> bool {
        match self.present(field) {
            Some(Value::String(s)) if allowed.contains(&s.as_str()) => true,
            Some(_) => self.fail(field, &format!("expected one of {}", allowed.join(", "))),
            None => false,
        }
    }

    fn unit(&mut self, field: &str) -> bool {
        match self.present(field).map(Value::as_f64) {
            Some(Some(n)) if (0.0..=1.0).contains(&n) => true,
            Some(Some(_)) => self.fail(field, "out of range"),
            Some(None) => self.fail(field, "expected a number"),
            None => false,
        }
    }

    fn integer(&mut self, field: &str, min: u64, max: u64) -> bool {
        match self.present(field) {
            Some(value) => self.check_integer(field, value, min, max),
            None => false,
        }
    }

    fn optional_integer(&mut self, field: &str, min: u64, max: u64) -> bool {
        match self.fields.get(field).filter(|v| !v.is_null()) {
            Some(value) => self.check_integer(field, value, min, max),
            None => true,
        }
    }

    fn check_integer(&mut self, field: &str, value: &Value, min: u64, max: u64) -> bool {
        match value.as_u64() {
            Some(n) if n >= min && n <= max => true,
            Some(_) => self.fail(field, "out of range"),
            None if value.is_number() => self.fail(field, "out of range"),
            None => self.fail(field, "expected an integer"),
        }
    }

    fn optional_bool(&mut self, field: &str) -> bool {
        match self.fields.get(field) {
            None | Some(Value::Bool(_)) => true,
            Some(_) => self.fail(field, "expected a boolean"),
        }
    }

    fn optional_string_array(&mut self, field: &str) -> bool {
        match self.fields.get(field) {
            None => true,
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => true,
            Some(_) => self.fail(field, "expected an array of strings"),
        }
    }
}

/// Everything an import produced. `dataset` and `audit` are present only
/// when validation succeeded.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub validation: ImportValidation,
    pub dataset: Option<Dataset>,
    pub conflicts: Vec<ConflictRecord>,
    pub stats: ImportStats,
    pub audit: Option<AuditEntry>,
}

impl ImportReport {
    pub fn success(&self) -> bool {
        self.validation.success
    }
}

/// Validate `json_text` and reconcile it into `current`. The resulting
/// dataset's history ends with one `IMPORT_SYNC` entry.
pub fn import_backup(current: &Dataset, json_text: &str, options: ImportOptions) -> ImportReport {
    let mut validation = validate_backup(json_text);
    let Some(package) = validation.package.take() else {
        return ImportReport {
            validation,
            ..Default::default()
        };
    };

    let conflicts = detect_conflicts(current, &package.data);
    let result = apply_import(current, &package.data, options);
    let stats = result.stats;

    let mut seen = HashSet::new();
    let affected: Vec<String> = conflicts
        .iter()
        .filter(|c| seen.insert(c.id.as_str()))
        .map(|c| c.id.clone())
        .collect();

    let audit = AuditEntry::new(
        AuditType::ImportSync,
        format!(
            "Imported backup exported {} ({} strategy): {} added, {} overwritten, {} skipped, {} re-identified",
            package.metadata.export_date,
            options.strategy,
            stats.added,
            stats.overwritten,
            stats.skipped,
            stats.reassigned
        ),
        affected,
    );

    let mut dataset = result.dataset;
    dataset.history.push(audit.clone());

    info!(
        "Imported backup with {} conflicts: {} records now",
        conflicts.len(),
        dataset.item_counts().total()
    );

    ImportReport {
        validation,
        dataset: Some(dataset),
        conflicts,
        stats,
        audit: Some(audit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_ledger_schemas::{AuditId, MemoryId, MemoryRecord, MemoryStatus, Session, SessionId};
    use serde_json::json;

    fn sample_dataset() -> Dataset {
        Dataset {
            memories: vec![MemoryRecord {
                id: MemoryId("mem-1".to_string()),
                content: "Grows tomatoes".to_string(),
                category: Category::Habit,
                layer: 2,
                confidence: 0.75,
                evidence: vec!["garden chat".to_string()],
                status: MemoryStatus::Active,
                created_at: "2024-05-01T08:00:00Z".to_string(),
                updated_at: "2024-05-01T08:00:00Z".to_string(),
                confirmed_by_human: true,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_export_metadata() {
        let dataset = sample_dataset();
        let package = export_backup(&dataset, "0.1.0").unwrap();
        let body = serde_json::to_string(&dataset).unwrap();

        assert_eq!(package.metadata.version, BACKUP_VERSION);
        assert_eq!(package.metadata.data_size, body.len() as u64);
        assert_eq!(package.metadata.item_counts.memories, 1);
        assert_eq!(package.metadata.checksum.len(), 64);
        assert_eq!(package.metadata.checksum, compute_checksum(&dataset).unwrap());
    }

    #[test]
    fn test_validate_exported_backup() {
        let package = export_backup(&sample_dataset(), "0.1.0").unwrap();
        let text = serde_json::to_string_pretty(&package).unwrap();

        let validation = validate_backup(&text);
        assert!(validation.success, "{:?}", validation.errors);
        assert!(validation.warnings.is_empty(), "{:?}", validation.warnings);
        assert_eq!(validation.package, Some(package));
    }

    #[test]
    fn test_validate_reports_field_errors() {
        let mut value = serde_json::to_value(export_backup(&sample_dataset(), "0.1.0").unwrap()).unwrap();
        value["data"]["memories"][0]["confidence"] = json!(3.5);
        value["data"]["memories"][0]["category"] = json!("hobby");
        value["data"]["sessions"] = json!({});

        let validation = validate_backup(&value.to_string());
        assert!(!validation.success);
        assert!(validation.package.is_none());
        assert!(validation
            .errors
            .contains(&"data.memories[0].confidence: out of range".to_string()));
        assert!(validation
            .errors
            .iter()
            .any(|e| e.starts_with("data.memories[0].category: expected one of")));
        assert!(validation
            .errors
            .contains(&"data.sessions: expected an array".to_string()));
    }

    #[test]
    fn test_validate_missing_metadata() {
        let validation = validate_backup(r#"{"data": {}}"#);
        assert!(!validation.success);
        assert!(validation.errors.contains(&"metadata: missing".to_string()));
        assert!(validation.errors.contains(&"data.memories: missing".to_string()));

        let validation = validate_backup("not json");
        assert!(!validation.success);
        assert!(validation.errors[0].starts_with("invalid JSON"));
    }

    #[test]
    fn test_version_and_checksum_mismatch_are_warnings() {
        let mut value = serde_json::to_value(export_backup(&sample_dataset(), "0.1.0").unwrap()).unwrap();
        value["metadata"]["version"] = json!("0.9");
        value["data"]["memories"][0]["content"] = json!("Grows peppers");

        let validation = validate_backup(&value.to_string());
        assert!(validation.success, "{:?}", validation.errors);
        assert_eq!(validation.warnings.len(), 2);
    }

    #[test]
    fn test_import_merge_new_overwrites() {
        let current = sample_dataset();
        let mut incoming = sample_dataset();
        incoming.memories[0].content = "Grows heirloom tomatoes".to_string();
        let text = serde_json::to_string(&export_backup(&incoming, "0.1.0").unwrap()).unwrap();

        let report = import_backup(
            &current,
            &text,
            ImportOptions {
                strategy: crate::ImportStrategy::Merge,
                conflict_resolution: crate::ConflictResolution::New,
            },
        );

        assert!(report.success());
        assert_eq!(report.conflicts.len(), 1);
        let dataset = report.dataset.unwrap();
        assert_eq!(dataset.memories.len(), 1);
        assert_eq!(dataset.memories[0].id.0, "mem-1");
        assert_eq!(dataset.memories[0].content, "Grows heirloom tomatoes");

        let audit = report.audit.unwrap();
        assert_eq!(audit.entry_type, AuditType::ImportSync);
        assert_eq!(dataset.history.last(), Some(&audit));
        assert_eq!(audit.affected_record_ids, vec!["mem-1".to_string()]);
    }

    #[test]
    fn test_import_audit_lists_each_conflicting_id_once() {
        let mut current = sample_dataset();
        current.sessions.push(Session {
            id: SessionId("ses-1".to_string()),
            title: "Garden planning".to_string(),
            started_at: "2024-05-01T08:00:00Z".to_string(),
            ended_at: None,
            message_count: 4,
            summary: None,
        });
        let mut entry = AuditEntry::new(AuditType::ManualOverride, "Confirmed".to_string(), vec![]);
        entry.id = AuditId("mem-1".to_string());
        current.history.push(entry);

        let text = serde_json::to_string(&export_backup(&current, "0.1.0").unwrap()).unwrap();
        let report = import_backup(&current, &text, ImportOptions::default());

        // memories, sessions and history each collide; "mem-1" shows up twice
        assert_eq!(report.conflicts.len(), 3);
        let audit = report.audit.unwrap();
        assert_eq!(
            audit.affected_record_ids,
            vec!["mem-1".to_string(), "ses-1".to_string()]
        );
    }

    #[test]
    fn test_import_invalid_backup_changes_nothing() {
        let report = import_backup(&sample_dataset(), "{}", ImportOptions::default());
        assert!(!report.success());
        assert!(report.dataset.is_none());
        assert!(report.audit.is_none());
    }
}
