use crate::error::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Last completed page of a paged sync job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCheckpoint {
    pub job: String,
    pub last_page: u32,
    pub total_pages: Option<u32>,
    pub updated_at: i64,
}

/// Local SQLite metadata for resumable sync jobs
pub struct IngestMeta {
    conn: Mutex<Connection>,
}

impl IngestMeta {
    pub fn open_at_root<P: AsRef<Path>>(data_root: P) -> Result<Self> {
        let db_path = data_root.as_ref().join("ingest_meta.db");
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_checkpoints (
                job          TEXT PRIMARY KEY,
                last_page    INTEGER NOT NULL,
                total_pages  INTEGER,
                updated_at   INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS run_history (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                job          TEXT NOT NULL,
                started_at   INTEGER NOT NULL,
                finished_at  INTEGER NOT NULL,
                rows_upserted INTEGER NOT NULL,
                failures     INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_checkpoint(&self, job: &str) -> Result<Option<SyncCheckpoint>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT job, last_page, total_pages, updated_at FROM sync_checkpoints WHERE job = ?1",
        )?;
        let mut rows = stmt.query(params![job])?;
        if let Some(row) = rows.next()? {
            Ok(Some(SyncCheckpoint {
                job: row.get(0)?,
                last_page: row.get::<_, i64>(1)? as u32,
                total_pages: row.get::<_, Option<i64>>(2)?.map(|t| t as u32),
                updated_at: row.get(3)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn set_checkpoint(&self, job: &str, last_page: u32, total_pages: Option<u32>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sync_checkpoints (job, last_page, total_pages, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job) DO UPDATE SET last_page=excluded.last_page, total_pages=excluded.total_pages, updated_at=excluded.updated_at",
            params![
                job,
                last_page as i64,
                total_pages.map(|t| t as i64),
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    pub fn clear_checkpoint(&self, job: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM sync_checkpoints WHERE job = ?1", params![job])?;
        Ok(())
    }

    pub fn record_run(
        &self,
        job: &str,
        started_at: i64,
        rows_upserted: u64,
        failures: u64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO run_history (job, started_at, finished_at, rows_upserted, failures) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job,
                started_at,
                Utc::now().timestamp(),
                rows_upserted as i64,
                failures as i64
            ],
        )?;
        Ok(())
    }

    pub fn run_count(&self, job: &str) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM run_history WHERE job = ?1",
            params![job],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
