//! Identifier allocation for the Assetgraph loader
//!
//! Maps external natural keys (SWID tags, SKUs, host names, ...) to stable
//! internal node ids. The first lookup of a key allocates a fresh id and
//! reports `is_new = true`; every later lookup returns the same id with
//! `is_new = false`.
//!
//! Two allocators implement [`IdentifierAllocator`]:
//!
//! - [`MemoryAllocator`]: process-local, used by tests and dry runs.
//! - [`PersistentAllocator`]: backed by an append-only log so ids survive
//!   process restarts. Dropping it syncs the log.

pub mod log;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::log::{IdLog, IdLogEntry};

/// File name of the allocation log inside a persistent id map directory.
pub const ID_LOG_FILE: &str = "idmap.log";

#[derive(Debug, thiserror::Error)]
pub enum IdMapError {
    #[error("identifier map I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("identifier map encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("external key of {0} bytes is too large to record")]
    KeyTooLarge(usize),
    #[error("identifier map write failed earlier: {0}")]
    Poisoned(String),
}

/// Opaque stable node handle. Rendered as `0x`-prefixed lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalId(pub u64);

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Assigns internal ids to external keys. Must be safe to share across tasks.
pub trait IdentifierAllocator: Send + Sync {
    /// Resolve `external_key`, allocating on first sight.
    fn assign_id(&self, external_key: &str) -> (InternalId, bool);

    /// Make every allocation so far durable. No-op for in-memory allocators.
    fn flush(&self) -> Result<(), IdMapError> {
        Ok(())
    }

    /// Number of keys currently mapped.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// In-memory allocator
// ============================================================================

#[derive(Debug)]
pub struct MemoryAllocator {
    index: DashMap<String, u64>,
    next: AtomicU64,
}

impl Default for MemoryAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAllocator {
    pub fn new() -> Self {
        Self {
            index: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdentifierAllocator for MemoryAllocator {
    fn assign_id(&self, external_key: &str) -> (InternalId, bool) {
        if let Some(id) = self.index.get(external_key) {
            return (InternalId(*id), false);
        }
        match self.index.entry(external_key.to_string()) {
            Entry::Occupied(e) => (InternalId(*e.get()), false),
            Entry::Vacant(v) => {
                let id = self.next.fetch_add(1, Ordering::SeqCst);
                v.insert(id);
                (InternalId(id), true)
            }
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

// ============================================================================
// Persistent allocator
// ============================================================================

/// Allocator whose assignments are recorded in `<dir>/idmap.log`.
///
/// Write failures cannot be reported from [`IdentifierAllocator::assign_id`];
/// the first one is kept and returned by every later [`flush`](Self::flush).
pub struct PersistentAllocator {
    index: DashMap<String, u64>,
    next: AtomicU64,
    log: IdLog,
    dir: PathBuf,
    write_error: Mutex<Option<String>>,
}

impl PersistentAllocator {
    /// Open the id map stored under `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, IdMapError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (log, entries) = IdLog::open(&dir.join(ID_LOG_FILE))?;
        let index = DashMap::with_capacity(entries.len());
        let mut max_id = 0u64;
        for entry in entries {
            max_id = max_id.max(entry.id);
            index.insert(entry.key, entry.id);
        }

        tracing::info!(
            dir = %dir.display(),
            keys = index.len(),
            "identifier map opened"
        );

        Ok(Self {
            index,
            next: AtomicU64::new(max_id + 1),
            log,
            dir,
            write_error: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_failure(&self, err: IdMapError) {
        tracing::error!(log = %self.log.path().display(), error = %err, "cannot record id allocation");
        let mut slot = self.write_error.lock();
        if slot.is_none() {
            *slot = Some(err.to_string());
        }
    }
}

impl IdentifierAllocator for PersistentAllocator {
    fn assign_id(&self, external_key: &str) -> (InternalId, bool) {
        if let Some(id) = self.index.get(external_key) {
            return (InternalId(*id), false);
        }
        // The shard guard is released before the log is written.
        let id = match self.index.entry(external_key.to_string()) {
            Entry::Occupied(e) => return (InternalId(*e.get()), false),
            Entry::Vacant(v) => {
                let id = self.next.fetch_add(1, Ordering::SeqCst);
                v.insert(id);
                id
            }
        };
        let entry = IdLogEntry {
            key: external_key.to_string(),
            id,
        };
        if let Err(err) = self.log.append(&entry) {
            self.record_failure(err);
        }
        (InternalId(id), true)
    }

    fn flush(&self) -> Result<(), IdMapError> {
        if let Some(msg) = self.write_error.lock().clone() {
            return Err(IdMapError::Poisoned(msg));
        }
        self.log.sync()
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

impl Drop for PersistentAllocator {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::error!(dir = %self.dir.display(), error = %err, "identifier map not flushed on close");
        }
    }
}
