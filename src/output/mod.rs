//! Output module for crawl statistics
//!
//! This module handles:
//! - Computing statistics from a finished crawl or from the database
//! - Printing them to stdout

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};

use crate::storage::{Storage, StorageResult};

/// Loads statistics for every run recorded in the database, oldest first
pub fn load_all_statistics(storage: &dyn Storage) -> StorageResult<Vec<CrawlStatistics>> {
    storage
        .list_runs()?
        .iter()
        .map(|run| load_statistics(storage, run))
        .collect()
}
