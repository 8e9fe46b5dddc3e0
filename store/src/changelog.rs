//! Append-only change log stored in its own SQLite file.
//!
//! Every accepted write becomes one row in `entries`. Rows are never updated
//! or deleted; the local `seq` orders them for the indexer and the content
//! hash `id` identifies them across peers during replication.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use geo_core::types::Node;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

/// One operation of a batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Put { key: String, value: Node },
    Del { key: String },
}

impl BatchOp {
    pub fn put(key: impl Into<String>, value: Node) -> Self {
        BatchOp::Put {
            key: key.into(),
            value,
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        BatchOp::Del { key: key.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Put,
    Del,
}

impl EntryKind {
    fn code(self) -> i64 {
        match self {
            EntryKind::Put => 0,
            EntryKind::Del => 1,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(EntryKind::Put),
            1 => Some(EntryKind::Del),
            _ => None,
        }
    }
}

/// A log entry as it travels between peers.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Hex SHA-256 of kind, key and value.
    pub id: String,
    pub kind: EntryKind,
    pub key: String,
    pub value: Option<Node>,
}

impl LogEntry {
    pub fn from_op(op: BatchOp) -> Result<Self> {
        match op {
            BatchOp::Put { key, value } => {
                if !value.is_valid() {
                    return Err(StoreError::InvalidCoordinates {
                        key,
                        lat: value.lat,
                        lon: value.lon,
                    });
                }
                let json = serde_json::to_vec(&value)?;
                Ok(Self {
                    id: entry_id(EntryKind::Put, &key, Some(&json)),
                    kind: EntryKind::Put,
                    key,
                    value: Some(value),
                })
            }
            BatchOp::Del { key } => Ok(Self {
                id: entry_id(EntryKind::Del, &key, None),
                kind: EntryKind::Del,
                key,
                value: None,
            }),
        }
    }
}

/// A log entry together with its local position in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequenced {
    pub seq: i64,
    pub entry: LogEntry,
}

fn entry_id(kind: EntryKind, key: &str, value: Option<&[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update([kind.code() as u8]);
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    if let Some(value) = value {
        hasher.update(value);
    }
    format!("{:x}", hasher.finalize())
}

pub struct ChangeLog {
    conn: Mutex<Connection>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl ChangeLog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS entries (
                 seq   INTEGER PRIMARY KEY AUTOINCREMENT,
                 id    TEXT NOT NULL UNIQUE,
                 kind  INTEGER NOT NULL,
                 key   TEXT NOT NULL,
                 value BLOB
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned("change log"))
    }

    /// Append `entries` in one transaction.
    ///
    /// Entries whose id is already present are skipped. Returns the number
    /// of rows actually added.
    pub fn append(&self, entries: &[LogEntry]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO entries (id, kind, key, value) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in entries {
                let value = entry.value.as_ref().map(serde_json::to_vec).transpose()?;
                added += stmt.execute(params![entry.id, entry.kind.code(), entry.key, value])?;
            }
        }
        tx.commit()?;
        self.writes.fetch_add(added as u64, Ordering::Relaxed);
        Ok(added)
    }

    /// Sequence number of the newest entry, or 0 for an empty log.
    pub fn head(&self) -> Result<i64> {
        let conn = self.lock()?;
        let head: Option<i64> = conn
            .query_row("SELECT MAX(seq) FROM entries", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(head.unwrap_or(0))
    }

    /// Id of the entry at `seq`, if the log holds one.
    pub fn id_at(&self, seq: i64) -> Result<Option<String>> {
        let conn = self.lock()?;
        let id = conn
            .query_row("SELECT id FROM entries WHERE seq = ?1", params![seq], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(id)
    }

    pub fn len(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Up to `limit` entries with `seq > after`, oldest first.
    pub fn read_after(&self, after: i64, limit: usize) -> Result<Vec<Sequenced>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT seq, id, kind, key, value FROM entries WHERE seq > ?1 ORDER BY seq LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![after, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<Vec<u8>>>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, id, kind, key, value) = row?;
            out.push(Sequenced {
                seq,
                entry: decode_entry(id, kind, key, value)?,
            });
        }
        self.reads.fetch_add(out.len() as u64, Ordering::Relaxed);
        Ok(out)
    }

    /// Ids of every entry in the log.
    pub fn ids(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT id FROM entries ORDER BY seq")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        self.reads.fetch_add(ids.len() as u64, Ordering::Relaxed);
        Ok(ids)
    }

    /// Every entry whose id is not in `known`, in log order.
    pub fn entries_except(&self, known: &HashSet<String>) -> Result<Vec<LogEntry>> {
        let mut out = Vec::new();
        let mut after = 0;
        loop {
            let page = self.read_after(after, 1024)?;
            let Some(last) = page.last() else {
                break;
            };
            after = last.seq;
            out.extend(
                page.into_iter()
                    .map(|s| s.entry)
                    .filter(|e| !known.contains(&e.id)),
            );
        }
        Ok(out)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

fn decode_entry(id: String, kind: i64, key: String, value: Option<Vec<u8>>) -> Result<LogEntry> {
    let kind = EntryKind::from_code(kind)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown kind {kind} on entry {id}")))?;
    let value = match value {
        Some(bytes) => Some(serde_json::from_slice::<Node>(&bytes)?),
        None => None,
    };
    Ok(LogEntry {
        id,
        kind,
        key,
        value,
    })
}
