use crate::app::ports::Pacer;
use crate::observability::metrics;
use crate::storage::{column_text, Storage};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Totals of one chunked upsert
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertReport {
    pub attempted: usize,
    pub upserted: usize,
    pub failed_chunks: usize,
    pub errors: Vec<String>,
    /// Rows as stored, including generated ids
    #[serde(skip)]
    pub rows: Vec<Value>,
}

impl UpsertReport {
    pub fn merge(&mut self, other: UpsertReport) {
        self.attempted += other.attempted;
        self.upserted += other.upserted;
        self.failed_chunks += other.failed_chunks;
        self.errors.extend(other.errors);
        self.rows.extend(other.rows);
    }
}

/// Writes rows in fixed-size chunks. A failed chunk is logged and counted, the rest still run.
#[derive(Clone)]
pub struct Upserter {
    storage: Arc<dyn Storage>,
    pacer: Arc<dyn Pacer>,
    batch_size: usize,
    chunk_pause: Duration,
}

impl Upserter {
    pub fn new(storage: Arc<dyn Storage>, pacer: Arc<dyn Pacer>, batch_size: usize) -> Self {
        Self {
            storage,
            pacer,
            batch_size: batch_size.max(1),
            chunk_pause: Duration::ZERO,
        }
    }

    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn upsert(&self, table: &str, rows: Vec<Value>, on_conflict: &str) -> UpsertReport {
        let rows = dedupe_by_key(rows, on_conflict);
        let mut report = UpsertReport {
            attempted: rows.len(),
            ..UpsertReport::default()
        };
        if rows.is_empty() {
            return report;
        }

        let started = Instant::now();
        let chunk_count = (rows.len() + self.batch_size - 1) / self.batch_size;
        for (index, chunk) in rows.chunks(self.batch_size).enumerate() {
            if index > 0 {
                self.pacer.pause(self.chunk_pause).await;
            }
            match self.storage.upsert(table, chunk, on_conflict).await {
                Ok(stored) => {
                    debug!("Chunk {}/{} into {}: {} row(s)", index + 1, chunk_count, table, stored.len());
                    metrics::upsert::rows_upserted(table, stored.len());
                    report.upserted += stored.len();
                    report.rows.extend(stored);
                }
                Err(e) => {
                    warn!("Chunk {}/{} into {} failed: {}", index + 1, chunk_count, table, e);
                    metrics::upsert::chunk_failed(table);
                    report.failed_chunks += 1;
                    report.errors.push(format!("chunk {}: {}", index + 1, e));
                }
            }
        }
        metrics::upsert::duration(table, started.elapsed().as_secs_f64());
        info!(
            "Upserted {}/{} row(s) into {} ({} failed chunk(s))",
            report.upserted, report.attempted, table, report.failed_chunks
        );
        report
    }
}

/// Keep the last row per conflict key. Rows missing a key column pass through untouched.
pub fn dedupe_by_key(rows: Vec<Value>, on_conflict: &str) -> Vec<Value> {
    let columns: Vec<&str> = on_conflict.split(',').map(str::trim).collect();
    let mut positions: HashMap<Vec<String>, usize> = HashMap::new();
    let mut out: Vec<Value> = Vec::with_capacity(rows.len());
    for row in rows {
        let key: Option<Vec<String>> = columns.iter().map(|c| column_text(&row, c)).collect();
        match key {
            Some(key) => match positions.get(&key) {
                Some(&at) => out[at] = row,
                None => {
                    positions.insert(key, out.len());
                    out.push(row);
                }
            },
            None => out.push(row),
        }
    }
    out
}
