use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::{MemoryBackend, MemoryRecord, Scope, SearchFilters};
use crate::error::MemoryError;

/// SQLite-backed memory storage.
///
/// Embeddings are stored as little-endian `f32` blobs and `created_at` as
/// microseconds since the epoch. Scope filtering happens in SQL; metadata
/// filters are applied to the scope's rows before they are returned.
pub struct SqliteMemoryBackend {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS memories (
        id TEXT PRIMARY KEY,
        family_id TEXT NOT NULL,
        user_id TEXT,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL,
        metadata TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_memories_scope ON memories(family_id, user_id);";

const COLUMNS: &str = "id, family_id, user_id, content, embedding, metadata, created_at";

type RawRow = (String, String, Option<String>, String, Vec<u8>, String, i64);

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

impl SqliteMemoryBackend {
    /// Open (or create) the memory database at `path`.
    pub fn open(path: &Path) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::PersistenceFailure(format!(
                    "failed to create '{}': {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, MemoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, MemoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, MemoryError> {
        self.conn
            .lock()
            .map_err(|e| MemoryError::PersistenceFailure(format!("lock poisoned: {e}")))
    }

    /// Rows of `scope` in `order`, decoded and passed through the metadata
    /// filters.
    fn scoped_rows(
        &self,
        scope: &Scope,
        filters: &SearchFilters,
        order: &str,
    ) -> Result<(Vec<MemoryRecord>, usize), MemoryError> {
        let rows: Vec<RawRow> = {
            let conn = self.lock_conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM memories WHERE family_id = ?1 AND user_id IS ?2 {order}"
            ))?;
            let mapped = stmt.query_map(
                params![
                    scope.family_id.to_string(),
                    scope.user_id.map(|u| u.to_string())
                ],
                raw_row,
            )?;
            let rows = mapped.collect::<Result<Vec<RawRow>, _>>()?;
            rows
        };

        let total = rows.len();
        let mut records = Vec::with_capacity(total);
        for row in rows {
            let record = decode_row(row)?;
            if filters.matches(&record.metadata) {
                records.push(record);
            }
        }
        Ok((records, total))
    }
}

impl MemoryBackend for SqliteMemoryBackend {
    fn insert(&self, record: &MemoryRecord) -> Result<(), MemoryError> {
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| MemoryError::PersistenceFailure(e.to_string()))?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO memories (id, family_id, user_id, content, embedding, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.scope.family_id.to_string(),
                record.scope.user_id.map(|u| u.to_string()),
                record.content,
                encode_embedding(&record.embedding),
                metadata,
                record.created_at.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    fn candidates(
        &self,
        scope: &Scope,
        filters: &SearchFilters,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let (records, total) = self.scoped_rows(scope, filters, "")?;
        debug!(
            "Memory candidates for {scope}: {} of {total} pass filters",
            records.len()
        );
        Ok(records)
    }

    fn list(
        &self,
        scope: &Scope,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let (records, _) =
            self.scoped_rows(scope, filters, "ORDER BY created_at DESC, id ASC")?;
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>, MemoryError> {
        let row = {
            let conn = self.lock_conn()?;
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM memories WHERE id = ?1"),
                params![id.to_string()],
                raw_row,
            )
            .optional()?
        };
        row.map(decode_row).transpose()
    }

    fn count(&self, scope: &Scope) -> Result<usize, MemoryError> {
        let conn = self.lock_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE family_id = ?1 AND user_id IS ?2",
            params![
                scope.family_id.to_string(),
                scope.user_id.map(|u| u.to_string())
            ],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as usize)
    }
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> MemoryError {
    MemoryError::PersistenceFailure(format!("corrupt {what} in memory row: {detail}"))
}

fn parse_uuid(what: &str, raw: &str) -> Result<Uuid, MemoryError> {
    Uuid::parse_str(raw).map_err(|e| corrupt(what, e))
}

fn decode_row(
    (id, family_id, user_id, content, embedding, metadata, created_at): RawRow,
) -> Result<MemoryRecord, MemoryError> {
    let metadata: Map<String, Value> =
        serde_json::from_str(&metadata).map_err(|e| corrupt("metadata", e))?;
    let created_at = DateTime::from_timestamp_micros(created_at)
        .ok_or_else(|| corrupt("created_at", created_at))?;
    Ok(MemoryRecord {
        id: parse_uuid("id", &id)?,
        scope: Scope {
            family_id: parse_uuid("family_id", &family_id)?,
            user_id: user_id
                .as_deref()
                .map(|u| parse_uuid("user_id", u))
                .transpose()?,
        },
        content,
        embedding: decode_embedding(&embedding)?,
        metadata,
        created_at,
    })
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, MemoryError> {
    if bytes.len() % 4 != 0 {
        return Err(corrupt("embedding", format!("{} bytes", bytes.len())));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
