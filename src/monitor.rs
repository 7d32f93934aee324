//! Interaction log
//!
//! Append-only audit trail of every request, one row per request, stored in
//! SQLite. Rows are inserted once and never updated or deleted; aggregate
//! counters are computed from them on demand.

use crate::error::{GateError, Result};
use chrono::Local;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS interactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    user_text TEXT,
    db_key TEXT,
    generated_sql TEXT,
    valid INTEGER,
    blocked_reason TEXT,
    latency_ms INTEGER,
    rows_returned INTEGER,
    verified INTEGER,
    error TEXT
)
"#;

/// Fields captured for one finished request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInteraction {
    pub user_text: String,
    pub db_key: String,
    /// Final (sanitized) SQL
    pub generated_sql: String,
    pub valid: bool,
    pub blocked_reason: String,
    pub latency_ms: u64,
    pub rows_returned: u64,
    pub verified: bool,
    pub error: String,
}

/// Stored interaction row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: i64,
    pub timestamp: String,
    pub user_text: String,
    pub db_key: String,
    pub generated_sql: String,
    pub valid: bool,
    pub blocked_reason: String,
    pub latency_ms: u64,
    pub rows_returned: u64,
    pub verified: bool,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionStats {
    pub total: u64,
    pub valid_count: u64,
    pub verified_count: u64,
    pub error_count: u64,
}

pub struct InteractionRecorder {
    db: Mutex<Connection>,
}

impl InteractionRecorder {
    /// Open (or create) the interaction log at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            GateError::Recorder(format!("Failed to open {}: {}", path.display(), e))
        })?;
        info!("Interaction log at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| GateError::Recorder("interaction log lock poisoned".to_string()))
    }

    /// Append one record and return its id.
    pub fn record(&self, entry: &NewInteraction) -> Result<i64> {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT INTO interactions
                (ts, user_text, db_key, generated_sql, valid, blocked_reason,
                 latency_ms, rows_returned, verified, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                ts,
                entry.user_text,
                entry.db_key,
                entry.generated_sql,
                entry.valid as i64,
                entry.blocked_reason,
                entry.latency_ms as i64,
                entry.rows_returned as i64,
                entry.verified as i64,
                entry.error,
            ],
        )?;
        let id = db.last_insert_rowid();
        debug!("Recorded interaction {}", id);
        Ok(id)
    }

    pub fn stats(&self) -> Result<InteractionStats> {
        let db = self.conn()?;
        let stats = db.query_row(
            r#"
            SELECT COUNT(*),
                   SUM(valid),
                   SUM(verified),
                   SUM(CASE WHEN error IS NOT NULL AND error != '' THEN 1 ELSE 0 END)
            FROM interactions
            "#,
            [],
            |row| {
                Ok(InteractionStats {
                    total: row.get::<_, i64>(0)? as u64,
                    valid_count: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as u64,
                    verified_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                    error_count: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as u64,
                })
            },
        )?;
        Ok(stats)
    }

    /// Latest records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<InteractionRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT id, ts, user_text, db_key, generated_sql, valid, blocked_reason,
                   latency_ms, rows_returned, verified, error
            FROM interactions
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;
        let records = stmt
            .query_map(params![limit as i64], |row| {
                Ok(InteractionRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    user_text: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    db_key: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    generated_sql: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    valid: row.get::<_, Option<i64>>(5)?.unwrap_or(0) != 0,
                    blocked_reason: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    latency_ms: row.get::<_, Option<i64>>(7)?.unwrap_or(0) as u64,
                    rows_returned: row.get::<_, Option<i64>>(8)?.unwrap_or(0) as u64,
                    verified: row.get::<_, Option<i64>>(9)?.unwrap_or(0) != 0,
                    error: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(valid: bool, verified: bool, error: &str) -> NewInteraction {
        NewInteraction {
            user_text: "show orders".to_string(),
            db_key: "analytics".to_string(),
            generated_sql: "SELECT * FROM orders LIMIT 50".to_string(),
            valid,
            blocked_reason: if valid { String::new() } else { "blocked".to_string() },
            latency_ms: 12,
            rows_returned: if valid { 3 } else { 0 },
            verified,
            error: error.to_string(),
        }
    }

    #[test]
    fn test_empty_stats() {
        let recorder = InteractionRecorder::in_memory().unwrap();
        assert_eq!(recorder.stats().unwrap(), InteractionStats::default());
    }

    #[test]
    fn test_stats_aggregate() {
        let recorder = InteractionRecorder::in_memory().unwrap();
        recorder.record(&entry(true, true, "")).unwrap();
        recorder.record(&entry(true, false, "no such table: orders")).unwrap();
        recorder.record(&entry(false, false, "")).unwrap();

        let stats = recorder.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.valid_count, 2);
        assert_eq!(stats.verified_count, 1);
        assert_eq!(stats.error_count, 1);
    }

    #[test]
    fn test_recent_newest_first() {
        let recorder = InteractionRecorder::in_memory().unwrap();
        let first = recorder.record(&entry(true, true, "")).unwrap();
        let second = recorder.record(&entry(false, false, "")).unwrap();

        let records = recorder.recent(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, second);
        assert_eq!(records[1].id, first);
        assert!(!records[0].valid);
        assert_eq!(records[0].blocked_reason, "blocked");
        assert_eq!(records[1].rows_returned, 3);
        assert_eq!(records[1].latency_ms, 12);
    }

    #[test]
    fn test_open_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("metrics.db");
        {
            let recorder = InteractionRecorder::open(&path).unwrap();
            recorder.record(&entry(true, true, "")).unwrap();
        }
        let reopened = InteractionRecorder::open(&path).unwrap();
        assert_eq!(reopened.stats().unwrap().total, 1);
    }
}
