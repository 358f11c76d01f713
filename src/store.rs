use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::{params, Connection, OpenFlags};

use crate::DetectionSnapshot;

/// Backing store of the `detections_api` server.
///
/// `insert` assigns the id and `createdAt`; `list` returns every snapshot
/// newest first, with ties broken by insertion order (latest insert first).
pub trait DetectionStore: Send {
    fn insert(&mut self, objects: Vec<String>) -> Result<DetectionSnapshot>;

    fn list(&mut self) -> Result<Vec<DetectionSnapshot>>;
}

pub struct SqliteDetectionStore {
    conn: Connection,
}

impl SqliteDetectionStore {
    /// Open (or create) the database. `file:` URIs are accepted, which allows
    /// shared in-memory databases in tests.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              id TEXT NOT NULL UNIQUE,
              objects_json TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_created ON detections(created_at_ms);
            "#,
        )?;
        Ok(())
    }
}

impl DetectionStore for SqliteDetectionStore {
    fn insert(&mut self, objects: Vec<String>) -> Result<DetectionSnapshot> {
        let snapshot = new_snapshot(objects)?;
        let objects_json = serde_json::to_string(&snapshot.objects)?;
        self.conn.execute(
            r#"
            INSERT INTO detections(id, objects_json, created_at_ms)
            VALUES (?1, ?2, ?3)
            "#,
            params![
                snapshot.id,
                objects_json,
                snapshot.created_at.timestamp_millis()
            ],
        )?;
        Ok(snapshot)
    }

    fn list(&mut self) -> Result<Vec<DetectionSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, objects_json, created_at_ms FROM detections ORDER BY created_at_ms DESC, seq DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let objects_json: String = row.get(1)?;
            let created_at_ms: i64 = row.get(2)?;
            out.push(DetectionSnapshot {
                objects: serde_json::from_str(&objects_json)
                    .map_err(|e| anyhow!("corrupt detection {}: {}", id, e))?,
                created_at: from_millis(created_at_ms)?,
                id,
            });
        }
        Ok(out)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryDetectionStore {
    entries: Vec<DetectionSnapshot>,
}

impl InMemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectionStore for InMemoryDetectionStore {
    fn insert(&mut self, objects: Vec<String>) -> Result<DetectionSnapshot> {
        let snapshot = new_snapshot(objects)?;
        self.entries.push(snapshot.clone());
        Ok(snapshot)
    }

    fn list(&mut self) -> Result<Vec<DetectionSnapshot>> {
        let mut out: Vec<DetectionSnapshot> = self.entries.iter().rev().cloned().collect();
        // Stable sort keeps latest-insert-first among equal timestamps.
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

fn new_snapshot(objects: Vec<String>) -> Result<DetectionSnapshot> {
    let mut id = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut id);
    Ok(DetectionSnapshot {
        id: hex::encode(id),
        objects,
        created_at: from_millis(Utc::now().timestamp_millis())?,
    })
}

/// Stored timestamps have millisecond precision.
fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}
