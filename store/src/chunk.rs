//! Append-only blob file addressed in fixed-size chunks.
//!
//! Blobs are written back to back; a [`BlobRef`] remembers where one starts
//! and how long it is. The read/write counters count chunks touched rather
//! than calls, which is what the benchmark reports as chunk I/O.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use bincode::{Decode, Encode};
use geo_core::types::Node;

use crate::error::{Result, StoreError};

/// Location of one blob inside the chunk file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRef {
    pub offset: u64,
    pub len: u32,
}

/// Document body kept in the chunk store for every indexed node.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct StoredDoc {
    pub key: String,
    pub node: Node,
}

pub struct ChunkStore {
    file: Mutex<File>,
    chunk_size: u64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl ChunkStore {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(StoreError::InvalidConfig("chunk size must be > 0".into()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            chunk_size: chunk_size as u64,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, File>> {
        self.file.lock().map_err(|_| StoreError::Poisoned("chunk store"))
    }

    /// Append `blobs` with a single write and return their locations in
    /// the same order.
    pub fn append_batch(&self, blobs: &[Vec<u8>]) -> Result<Vec<BlobRef>> {
        if blobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut file = self.lock()?;
        let start = file.seek(SeekFrom::End(0))?;

        let mut buf = Vec::with_capacity(blobs.iter().map(Vec::len).sum());
        let mut refs = Vec::with_capacity(blobs.len());
        for blob in blobs {
            refs.push(BlobRef {
                offset: start + buf.len() as u64,
                len: blob.len() as u32,
            });
            buf.extend_from_slice(blob);
        }
        file.write_all(&buf)?;

        self.writes.fetch_add(
            chunks_spanned(start, buf.len() as u64, self.chunk_size),
            Ordering::Relaxed,
        );
        Ok(refs)
    }

    pub fn read(&self, blob: BlobRef) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; blob.len as usize];
        {
            let mut file = self.lock()?;
            file.seek(SeekFrom::Start(blob.offset))?;
            file.read_exact(&mut buf)?;
        }
        self.reads.fetch_add(
            chunks_spanned(blob.offset, blob.len as u64, self.chunk_size),
            Ordering::Relaxed,
        );
        Ok(buf)
    }

    pub fn encode_doc(doc: &StoredDoc) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(doc, bincode::config::standard())?)
    }

    pub fn read_doc(&self, blob: BlobRef) -> Result<StoredDoc> {
        let bytes = self.read(blob)?;
        let (doc, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(doc)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Number of `chunk`-sized chunks overlapped by `[offset, offset + len)`.
fn chunks_spanned(offset: u64, len: u64, chunk: u64) -> u64 {
    if len == 0 {
        return 0;
    }
    (offset + len - 1) / chunk - offset / chunk + 1
}
