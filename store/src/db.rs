use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use geo_core::constants::CHUNK_SIZE;
use geo_core::types::{BoundingBox, Node};

use crate::changelog::{BatchOp, ChangeLog, LogEntry};
use crate::chunk::{BlobRef, ChunkStore};
use crate::error::Result;
use crate::index::{Indexer, SpatialIndex};
use crate::paths::StorePaths;
use crate::{CounterSource, GeoStore, QueryStream};

/// R*Tree rows fetched per query page.
pub const QUERY_PAGE: usize = 256;

/// I/O counters of one store instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub log_reads: u64,
    pub log_writes: u64,
    pub chunk_reads: u64,
    pub chunk_writes: u64,
}

/// One store instance: change log, spatial index and chunk store, plus the
/// background indexer that keeps the latter two in step with the log.
pub struct GeoDb {
    pub(crate) log: Arc<ChangeLog>,
    index: Arc<SpatialIndex>,
    chunks: Arc<ChunkStore>,
    pub(crate) indexer: Indexer,
}

impl GeoDb {
    /// Open (or create) the store at `paths` and start its indexer.
    ///
    /// An index left over from a different (or longer) log is discarded.
    /// Log entries past the index watermark are indexed in the background
    /// right away; call [`GeoStore::ready`] to wait for them.
    pub fn open(paths: StorePaths) -> Result<Self> {
        paths.create_dirs()?;
        let log = Arc::new(ChangeLog::open(&paths.log)?);
        let index = Arc::new(SpatialIndex::open(&paths.index)?);
        let chunks = Arc::new(ChunkStore::open(&paths.chunks, CHUNK_SIZE)?);
        index.reconcile(&log)?;
        let indexer = Indexer::spawn(log.clone(), index.clone(), chunks.clone())?;
        indexer.notify();

        log::debug!(
            "Opened store: log={} index={} chunks={}",
            paths.log.display(),
            paths.index.display(),
            paths.chunks.display()
        );

        Ok(Self {
            log,
            index,
            chunks,
            indexer,
        })
    }

    /// Live documents in the index. Only exact after [`GeoStore::ready`].
    pub fn len(&self) -> Result<u64> {
        self.index.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.index.is_empty()
    }

    /// Entries in the change log, including superseded and deleted ones.
    pub fn log_len(&self) -> Result<u64> {
        self.log.len()
    }

    pub fn io_stats(&self) -> IoStats {
        IoStats {
            log_reads: self.log.reads(),
            log_writes: self.log.writes(),
            chunk_reads: self.chunks.reads(),
            chunk_writes: self.chunks.writes(),
        }
    }
}

impl GeoStore for GeoDb {
    fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let entries = ops
            .into_iter()
            .map(LogEntry::from_op)
            .collect::<Result<Vec<_>>>()?;
        let added = self.log.append(&entries)?;
        log::trace!("Batch appended {added} of {} entries", entries.len());
        self.indexer.notify();
        Ok(())
    }

    fn ready(&self, timeout: Option<Duration>) -> Result<()> {
        self.indexer.flush(timeout)
    }

    fn query(&self, bbox: BoundingBox) -> QueryStream<'_> {
        Box::new(QueryIter {
            index: &self.index,
            chunks: &self.chunks,
            bbox,
            cursor: 0,
            page: VecDeque::new(),
            exhausted: false,
        })
    }
}

impl CounterSource for GeoDb {
    fn counter_snapshot(&self) -> Vec<(&'static str, u64)> {
        let stats = self.io_stats();
        vec![
            ("log_reads", stats.log_reads),
            ("log_writes", stats.log_writes),
            ("chunk_reads", stats.chunk_reads),
            ("chunk_writes", stats.chunk_writes),
        ]
    }
}

/// Lazy range query: pulls [`QUERY_PAGE`] candidates at a time from the
/// R*Tree and yields the ones whose stored node is inside the box.
struct QueryIter<'a> {
    index: &'a SpatialIndex,
    chunks: &'a ChunkStore,
    bbox: BoundingBox,
    cursor: i64,
    page: VecDeque<(i64, BlobRef)>,
    exhausted: bool,
}

impl QueryIter<'_> {
    fn fill(&mut self) -> Result<()> {
        let page = self
            .index
            .candidates(&self.bbox, self.cursor, QUERY_PAGE)?;
        if page.len() < QUERY_PAGE {
            self.exhausted = true;
        }
        if let Some(&(docid, _)) = page.last() {
            self.cursor = docid;
        }
        self.page.extend(page);
        Ok(())
    }
}

impl Iterator for QueryIter<'_> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((_, blob)) = self.page.pop_front() {
                match self.chunks.read_doc(blob) {
                    Ok(doc) if self.bbox.contains(doc.node.lat, doc.node.lon) => {
                        return Some(Ok(doc.node));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        self.exhausted = true;
                        self.page.clear();
                        return Some(Err(e));
                    }
                }
            }

            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}
