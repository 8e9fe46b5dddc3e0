use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// On-disk locations of one store instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    /// SQLite file holding the append-only change log.
    pub log: PathBuf,
    /// SQLite file holding the spatial index.
    pub index: PathBuf,
    /// Chunked blob file holding indexed documents.
    pub chunks: PathBuf,
}

impl StorePaths {
    pub const LOG_FILE: &'static str = "log.db";
    pub const INDEX_FILE: &'static str = "index.db";
    pub const CHUNK_FILE: &'static str = "chunks.kdb";

    /// All three parts side by side in `dir`.
    pub fn under(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            log: dir.join(Self::LOG_FILE),
            index: dir.join(Self::INDEX_FILE),
            chunks: dir.join(Self::CHUNK_FILE),
        }
    }

    /// Read the log of an existing dataset but build the index and chunk
    /// store from scratch in `work_dir`.
    pub fn for_dataset(dataset_dir: impl AsRef<Path>, work_dir: impl AsRef<Path>) -> Self {
        let work_dir = work_dir.as_ref();
        Self {
            log: dataset_dir.as_ref().join(Self::LOG_FILE),
            index: work_dir.join(Self::INDEX_FILE),
            chunks: work_dir.join(Self::CHUNK_FILE),
        }
    }

    /// Create the parent directory of every part.
    pub fn create_dirs(&self) -> io::Result<()> {
        for path in [&self.log, &self.index, &self.chunks] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }
        Ok(())
    }
}
