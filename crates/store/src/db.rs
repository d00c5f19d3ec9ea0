use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use prism_core::error::{PrismError, Result};
use prism_core::query::StatusResponse;
use tracing::debug;

use crate::schema::SCHEMA_SQL;

const MEMORY_PATH: &str = ":memory:";

/// Span archive. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PrismError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| PrismError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| PrismError::Store(format!("failed to set pragmas: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| PrismError::Store(format!("failed to initialize schema: {e}")))?;
        debug!(path = %path.display(), "span archive opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PrismError::Store(format!("failed to open in-memory db: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| PrismError::Store(format!("failed to initialize schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: MEMORY_PATH.to_string(),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path == MEMORY_PATH
    }

    pub fn status(&self) -> Result<StatusResponse> {
        let conn = self.conn();

        let spans_count = scalar_usize(&conn, "SELECT COUNT(*) FROM spans")?;
        let traces_count = scalar_usize(&conn, "SELECT COUNT(DISTINCT trace_id) FROM spans")?;
        let newest_ingest = scalar_ts(&conn, "SELECT MAX(ingested_at) FROM spans")?;

        let db_size_bytes = if self.is_in_memory() {
            0
        } else {
            fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StatusResponse {
            db_path: self.db_path.clone(),
            db_size_bytes,
            spans_count,
            traces_count,
            newest_ingest,
        })
    }
}

/// Naive UTC literal accepted by a `TIMESTAMP` column.
pub(crate) fn sql_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| PrismError::Store(format!("query failed: {e}")))
}

fn scalar_ts(conn: &Connection, sql: &str) -> Result<Option<DateTime<Utc>>> {
    conn.query_row(sql, [], |row| row.get::<_, Option<NaiveDateTime>>(0))
        .map(|opt| opt.map(|dt| dt.and_utc()))
        .map_err(|e| PrismError::Store(format!("query failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_initializes() {
        let store = Store::open_in_memory().unwrap();
        let status = store.status().unwrap();
        assert_eq!(status.db_path, ":memory:");
        assert_eq!(status.spans_count, 0);
        assert_eq!(status.traces_count, 0);
        assert!(status.newest_ingest.is_none());
    }

    #[test]
    fn on_disk_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prism.duckdb");
        let store = Store::open(&path).unwrap();
        store.insert_spans(&testkit::sample_chain("t1")).unwrap();
        let status = store.status().unwrap();
        assert_eq!(status.spans_count, 5);
        assert!(status.db_size_bytes > 0);
    }
}
