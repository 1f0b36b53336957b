//! Disk store for encoded cache records
//!
//! Provides a `CacheStore` that keeps one binary record file per identifier
//! and replaces files atomically, so readers never observe a half-written
//! record even while a refresh is in progress.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::record::{decode_record, encode_record, CacheRecord, CorruptRecordError, EncodeError};

use super::key::ScriptId;

/// Distinguishes concurrent writes within one process
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors from reading or writing record files
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Cache file for {id} is corrupt: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: CorruptRecordError,
    },

    #[error("Record for {id} cannot be encoded: {source}")]
    Encode {
        id: String,
        #[source]
        source: EncodeError,
    },

    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads and writes cache records on disk
///
/// Each identifier owns exactly one `<id>.rec` file in the store directory.
/// Writes go through a uniquely named temp file followed by a rename, so a
/// crash mid-write leaves the previous record intact. A missing file is a
/// normal miss, not an error.
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Directory where record files are stored
    cache_dir: PathBuf,
}

impl CacheStore {
    /// Opens a store rooted at the given directory
    ///
    /// Creates the directory if needed and removes temp files left behind
    /// by interrupted writes.
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            cache_dir: cache_dir.into(),
        };
        fs::create_dir_all(&store.cache_dir)?;
        store.sweep_temp_files()?;
        Ok(store)
    }

    /// Returns the directory records are stored in
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path of the record file for the given identifier
    fn record_path(&self, id: &ScriptId) -> PathBuf {
        self.cache_dir.join(id.file_name())
    }

    /// Reads the record stored for an identifier
    ///
    /// Returns `Ok(None)` when no record file exists. A file that exists but
    /// does not decode is reported as `StoreError::Corrupt` rather than being
    /// silently skipped, so callers can decide how to recover.
    pub fn read(&self, id: &ScriptId) -> Result<Option<CacheRecord>, StoreError> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };

        let record = decode_record(&bytes).map_err(|source| StoreError::Corrupt {
            id: id.to_string(),
            source,
        })?;

        Ok(Some(record))
    }

    /// Writes a record for an identifier, replacing any previous one
    ///
    /// The record is encoded into a temp file, synced, then renamed over the
    /// final path. Failures before the rename leave any committed record
    /// untouched.
    pub fn write(&self, id: &ScriptId, record: &CacheRecord) -> Result<(), StoreError> {
        let bytes = encode_record(record).map_err(|source| StoreError::Encode {
            id: id.to_string(),
            source,
        })?;

        // Identifiers never start with a dot, so temp names cannot collide
        // with record files
        let tmp_path = self.cache_dir.join(format!(
            ".{}.{}.{}.tmp",
            id.file_name(),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed),
        ));

        let result = commit(&tmp_path, &self.record_path(id), &bytes);
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }

        Ok(result?)
    }

    /// Removes `*.tmp` files left behind by interrupted writes
    fn sweep_temp_files(&self) -> Result<(), StoreError> {
        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| name.ends_with(".tmp"))
                .unwrap_or(false);

            if is_temp && path.is_file() {
                fs::remove_file(&path).ok();
            }
        }
        Ok(())
    }
}

/// Writes bytes to a temp file, syncs it, then renames it into place
fn commit(tmp_path: &Path, final_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp_path, final_path)
}
