//! Storage traits and error types

use crate::crawler::PageRecord;
use crate::storage::{RunRecord, RunStatus, StoredPage};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new run for `site` and returns its ID
    fn create_run(&mut self, site: &str, config_hash: &str) -> StorageResult<i64>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Lists all runs, oldest first
    fn list_runs(&self) -> StorageResult<Vec<RunRecord>>;

    /// Sets the final status of a run and stamps its finish time
    fn complete_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Pages =====

    /// Writes the outcome of one fetched page
    ///
    /// Recording the same URL twice in a run replaces the earlier row.
    fn record_page(&mut self, run_id: i64, record: &PageRecord) -> StorageResult<()>;

    /// Loads the pages of a run in the order they were recorded
    fn load_pages(&self, run_id: i64) -> StorageResult<Vec<StoredPage>>;

    // ===== Statistics =====

    fn count_pages(&self, run_id: i64) -> StorageResult<u64>;

    /// Page count per fetch status (`ok`, `retryable_error`, `fatal_error`)
    fn count_pages_by_status(&self, run_id: i64) -> StorageResult<BTreeMap<String, u64>>;

    /// Page count per depth
    fn depth_breakdown(&self, run_id: i64) -> StorageResult<BTreeMap<u32, u64>>;

    /// Page count per render outcome
    fn render_breakdown(&self, run_id: i64) -> StorageResult<BTreeMap<String, u64>>;
}
