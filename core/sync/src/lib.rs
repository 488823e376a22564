pub mod backup;
pub mod error;
pub mod reconcile;
pub mod store;

pub use backup::{
    compute_checksum, export_backup, import_backup, validate_backup, ImportReport,
    ImportValidation, BACKUP_VERSION,
};
pub use error::StorageError;
pub use reconcile::{
    apply_collection, apply_import, detect_collection_conflicts, detect_conflicts,
    ConflictKind, ConflictRecord, ConflictResolution, ImportOptions, ImportResult, ImportStats,
    ImportStrategy,
};
pub use store::{load_dataset, save_dataset, KeyValueStore, MemoryStore, SqliteStore};
