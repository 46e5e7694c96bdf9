//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::crawler::PageRecord;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus, StoredPage};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn grouped_counts(&self, sql: &str, run_id: i64) -> StorageResult<BTreeMap<String, u64>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (key, count) = row?;
            counts.insert(key, count as u64);
        }
        Ok(counts)
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        site: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?).unwrap_or(RunStatus::Running),
    })
}

const RUN_COLUMNS: &str = "id, site, started_at, finished_at, config_hash, status";

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, site: &str, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (site, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![site, now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM runs ORDER BY id", RUN_COLUMNS))?;
        let runs = stmt
            .query_map([], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn complete_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Pages =====

    fn record_page(&mut self, run_id: i64, record: &PageRecord) -> StorageResult<()> {
        let result = &record.result;
        let title = record.page.as_ref().and_then(|p| p.title.as_deref());
        let link_count = record.page.as_ref().map_or(0, |p| p.links.len()) as i64;
        let error = result.failure.as_ref().map(|f| f.to_string());

        self.conn.execute(
            "INSERT OR REPLACE INTO pages
             (run_id, url, depth, status, http_status, final_url, elapsed_ms, attempts,
              render, title, error, link_count, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                run_id,
                record.task.url.as_str(),
                record.task.depth,
                result.status.as_str(),
                result.http_status,
                result.final_url.as_str(),
                result.elapsed.as_millis() as i64,
                result.attempts,
                result.render.as_str(),
                title,
                error,
                link_count,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_pages(&self, run_id: i64) -> StorageResult<Vec<StoredPage>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, depth, status, http_status, final_url, elapsed_ms, attempts,
             render, title, error, link_count, fetched_at
             FROM pages WHERE run_id = ?1 ORDER BY id",
        )?;

        let pages = stmt
            .query_map(params![run_id], |row| {
                Ok(StoredPage {
                    url: row.get(0)?,
                    depth: row.get(1)?,
                    status: row.get(2)?,
                    http_status: row.get(3)?,
                    final_url: row.get(4)?,
                    elapsed_ms: row.get::<_, i64>(5)? as u64,
                    attempts: row.get(6)?,
                    render: row.get(7)?,
                    title: row.get(8)?,
                    error: row.get(9)?,
                    link_count: row.get::<_, i64>(10)? as u64,
                    fetched_at: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(pages)
    }

    // ===== Statistics =====

    fn count_pages(&self, run_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_pages_by_status(&self, run_id: i64) -> StorageResult<BTreeMap<String, u64>> {
        self.grouped_counts(
            "SELECT status, COUNT(*) FROM pages WHERE run_id = ?1 GROUP BY status",
            run_id,
        )
    }

    fn depth_breakdown(&self, run_id: i64) -> StorageResult<BTreeMap<u32, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT depth, COUNT(*) FROM pages WHERE run_id = ?1 GROUP BY depth")?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut breakdown = BTreeMap::new();
        for row in rows {
            let (depth, count) = row?;
            breakdown.insert(depth, count as u64);
        }
        Ok(breakdown)
    }

    fn render_breakdown(&self, run_id: i64) -> StorageResult<BTreeMap<String, u64>> {
        self.grouped_counts(
            "SELECT render, COUNT(*) FROM pages WHERE run_id = ?1 GROUP BY render",
            run_id,
        )
    }
}
