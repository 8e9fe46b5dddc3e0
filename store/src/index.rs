//! Spatial index over the change log.
//!
//! The index lives in its own SQLite file: `docs` maps each live key to its
//! document in the chunk store and `docs_rtree` holds one degenerate box per
//! point. A watermark in `meta` records the last log sequence applied and
//! `log_tip` the id of that entry, so an index can be resumed against its own
//! log and is rebuilt from scratch against any other.
//!
//! Indexing runs on a background thread fed through an `mpsc` queue. Writers
//! only enqueue [`IndexJob::CatchUp`]; readiness is observed by sending a
//! [`IndexJob::Flush`] and waiting for its acknowledgement.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use geo_core::types::BoundingBox;
use rusqlite::{params, Connection, OptionalExtension};

use crate::changelog::{ChangeLog, EntryKind, Sequenced};
use crate::chunk::{BlobRef, ChunkStore, StoredDoc};
use crate::error::{Result, StoreError};

/// Log entries applied per index transaction.
const INDEX_BATCH: usize = 1024;

const WATERMARK: &str = "indexed_seq";

pub struct SpatialIndex {
    conn: Mutex<Connection>,
}

impl SpatialIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = OFF;
             CREATE TABLE IF NOT EXISTS meta (
                 name  TEXT PRIMARY KEY,
                 value INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS docs (
                 docid       INTEGER PRIMARY KEY,
                 key         TEXT NOT NULL UNIQUE,
                 blob_offset INTEGER NOT NULL,
                 blob_len    INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS log_tip (
                 id TEXT NOT NULL
             );
             CREATE VIRTUAL TABLE IF NOT EXISTS docs_rtree
                 USING rtree(docid, min_lat, max_lat, min_lon, max_lon);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned("spatial index"))
    }

    /// Last log sequence applied to the index.
    pub fn watermark(&self) -> Result<i64> {
        let conn = self.lock()?;
        let seq = conn
            .query_row(
                "SELECT value FROM meta WHERE name = ?1",
                params![WATERMARK],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(seq.unwrap_or(0))
    }

    /// Id of the log entry the watermark points at.
    pub fn tip(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        let id = conn
            .query_row("SELECT id FROM log_tip LIMIT 1", [], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(id)
    }

    /// Drop every document and the watermark.
    pub fn reset(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM docs;
             DELETE FROM docs_rtree;
             DELETE FROM meta;
             DELETE FROM log_tip;",
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Reset the index unless it was built from a prefix of `log`.
    ///
    /// Returns `true` when the index was discarded.
    pub fn reconcile(&self, log: &ChangeLog) -> Result<bool> {
        let watermark = self.watermark()?;
        if watermark == 0 {
            return Ok(false);
        }
        let expected = log.id_at(watermark)?;
        let tip = self.tip()?;
        if expected.is_some() && expected == tip {
            return Ok(false);
        }
        log::warn!(
            "Index watermark {watermark} does not match the change log (head {}); rebuilding",
            log.head()?
        );
        self.reset()?;
        Ok(true)
    }

    /// Number of live documents.
    pub fn len(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM docs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Apply a run of log entries in order and advance the watermark.
    ///
    /// Puts replace any earlier document with the same key; deletes drop it.
    pub fn apply(&self, entries: &[Sequenced], chunks: &ChunkStore) -> Result<()> {
        let Some(last) = entries.last() else {
            return Ok(());
        };

        let mut blobs = Vec::new();
        for s in entries {
            if let (EntryKind::Put, Some(node)) = (s.entry.kind, s.entry.value) {
                blobs.push(ChunkStore::encode_doc(&StoredDoc {
                    key: s.entry.key.clone(),
                    node,
                })?);
            }
        }
        let mut refs = chunks.append_batch(&blobs)?.into_iter();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut upsert = tx.prepare_cached(
                "INSERT INTO docs (key, blob_offset, blob_len) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE
                     SET blob_offset = excluded.blob_offset, blob_len = excluded.blob_len
                 RETURNING docid",
            )?;
            let mut find = tx.prepare_cached("SELECT docid FROM docs WHERE key = ?1")?;
            let mut drop_doc = tx.prepare_cached("DELETE FROM docs WHERE docid = ?1")?;
            let mut drop_box = tx.prepare_cached("DELETE FROM docs_rtree WHERE docid = ?1")?;
            let mut insert_box = tx.prepare_cached(
                "INSERT INTO docs_rtree (docid, min_lat, max_lat, min_lon, max_lon)
                 VALUES (?1, ?2, ?2, ?3, ?3)",
            )?;

            for s in entries {
                match (s.entry.kind, s.entry.value) {
                    (EntryKind::Put, Some(node)) => {
                        let blob = refs.next().ok_or_else(|| {
                            StoreError::Corrupt("chunk store returned too few refs".into())
                        })?;
                        let docid: i64 = upsert.query_row(
                            params![s.entry.key, blob.offset as i64, blob.len as i64],
                            |row| row.get(0),
                        )?;
                        drop_box.execute(params![docid])?;
                        insert_box.execute(params![docid, node.lat, node.lon])?;
                    }
                    (EntryKind::Put, None) => {
                        log::warn!("Log entry {} is a put without a value; skipped", s.entry.id);
                    }
                    (EntryKind::Del, _) => {
                        let docid: Option<i64> = find
                            .query_row(params![s.entry.key], |row| row.get(0))
                            .optional()?;
                        if let Some(docid) = docid {
                            drop_doc.execute(params![docid])?;
                            drop_box.execute(params![docid])?;
                        }
                    }
                }
            }

            tx.execute(
                "INSERT INTO meta (name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                params![WATERMARK, last.seq],
            )?;
            tx.execute("DELETE FROM log_tip", [])?;
            tx.execute("INSERT INTO log_tip (id) VALUES (?1)", params![last.entry.id])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Up to `limit` candidate documents intersecting `bbox` with
    /// `docid > after`, ordered by docid.
    ///
    /// The R*Tree stores 32-bit coordinates, so candidates may lie slightly
    /// outside `bbox`; callers filter against the decoded document.
    pub fn candidates(
        &self,
        bbox: &BoundingBox,
        after: i64,
        limit: usize,
    ) -> Result<Vec<(i64, BlobRef)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT d.docid, d.blob_offset, d.blob_len
             FROM docs_rtree r JOIN docs d ON d.docid = r.docid
             WHERE r.max_lat >= ?1 AND r.min_lat <= ?2
               AND r.max_lon >= ?3 AND r.min_lon <= ?4
               AND r.docid > ?5
             ORDER BY r.docid
             LIMIT ?6",
        )?;
        let rows = stmt.query_map(
            params![
                bbox.min_lat(),
                bbox.max_lat(),
                bbox.min_lon(),
                bbox.max_lon(),
                after,
                limit as i64
            ],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    BlobRef {
                        offset: row.get::<_, i64>(1)? as u64,
                        len: row.get::<_, i64>(2)? as u32,
                    },
                ))
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Work item for the indexer thread.
pub(crate) enum IndexJob {
    /// Index whatever the log holds beyond the watermark.
    CatchUp,
    /// Catch up, then acknowledge on the provided one-shot channel.
    Flush(mpsc::Sender<std::result::Result<(), String>>),
    Shutdown,
}

/// Handle for the background indexer thread.
pub(crate) struct Indexer {
    tx: mpsc::Sender<IndexJob>,
    handle: Option<JoinHandle<()>>,
}

impl Indexer {
    pub(crate) fn spawn(
        log: Arc<ChangeLog>,
        index: Arc<SpatialIndex>,
        chunks: Arc<ChunkStore>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<IndexJob>();
        let handle = thread::Builder::new()
            .name("geobench-indexer".to_string())
            .spawn(move || indexer_thread_main(rx, &log, &index, &chunks))?;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Ask the indexer to pick up new log entries. Non-blocking.
    pub(crate) fn notify(&self) {
        if let Err(e) = self.tx.send(IndexJob::CatchUp) {
            log::error!("Failed to notify indexer: {e}");
        }
    }

    /// Block until every log entry present at call time is indexed.
    pub(crate) fn flush(&self, timeout: Option<Duration>) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.tx
            .send(IndexJob::Flush(ack_tx))
            .map_err(|_| StoreError::Indexer("indexer thread has exited".into()))?;

        let ack = match timeout {
            Some(t) => ack_rx.recv_timeout(t).map_err(|e| match e {
                RecvTimeoutError::Timeout => StoreError::Timeout(t),
                RecvTimeoutError::Disconnected => {
                    StoreError::Indexer("indexer dropped the flush request".into())
                }
            })?,
            None => ack_rx
                .recv()
                .map_err(|_| StoreError::Indexer("indexer dropped the flush request".into()))?,
        };
        ack.map_err(StoreError::Indexer)
    }

    /// Stop the thread and wait for it. Safe to call more than once.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.tx.send(IndexJob::Shutdown);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                log::error!("Indexer thread panicked: {e:?}");
            }
        }
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn indexer_thread_main(
    rx: mpsc::Receiver<IndexJob>,
    log: &ChangeLog,
    index: &SpatialIndex,
    chunks: &ChunkStore,
) {
    log::debug!("Indexer thread started");
    for job in rx {
        match job {
            IndexJob::CatchUp => {
                if let Err(e) = catch_up(log, index, chunks) {
                    log::error!("Indexing failed: {e}");
                }
            }
            IndexJob::Flush(ack) => {
                let result = catch_up(log, index, chunks).map(|_| ()).map_err(|e| e.to_string());
                let _ = ack.send(result);
            }
            IndexJob::Shutdown => break,
        }
    }
    log::debug!("Indexer thread exiting");
}

/// Apply every log entry past the watermark. Returns how many were applied.
fn catch_up(log: &ChangeLog, index: &SpatialIndex, chunks: &ChunkStore) -> Result<usize> {
    let mut applied = 0;
    loop {
        let after = index.watermark()?;
        let batch = log.read_after(after, INDEX_BATCH)?;
        if batch.is_empty() {
            break;
        }
        index.apply(&batch, chunks)?;
        applied += batch.len();
    }
    if applied > 0 {
        log::trace!("Indexed {applied} log entries");
    }
    Ok(applied)
}
