//! # Pool - shared registry of open statfiles
//!
//! The pool owns every statfile a process has mapped. Callers ask for a file
//! by path (or by classifier symbol), get back an `Arc<Statfile>` and lock it
//! for the duration of their block reads and writes.
//!
//! ## Architecture
//!
//! ```text
//! Classifier
//!   |  get_statfile_by_symbol(cfg, "BAYES_SPAM", try_create)
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                 STATFILE POOL                 │
//! │                                               │
//! │  Mutex<HashMap<PathBuf, Arc<Statfile>>>       │
//! │     |                                         │
//! │     |  open(): tracked? → capacity → stat     │
//! │     |          size mismatch? → migrate()     │
//! │     |          map → mlock → madvise → touch  │
//! │     v                                         │
//! │  Arc<Statfile> ── Mutex<MappedFile>           │
//! │                                               │
//! │  invalidate task: sleep(period + jitter)      │
//! │                   → msync(MS_ASYNC) every file│
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | [`lib.rs`]     | `StatfilePool`, constructor, accessors, `Debug`, `Drop` |
//! | [`open`]       | `open()`, `create()`, `close()`, file locking        |
//! | [`migrate`]    | Resize by copying blocks into a fresh file           |
//! | [`invalidate`] | Periodic and on-demand flushing, page locking        |
//! | [`symbol`]     | Classifier symbol → statfile resolution              |
//!
//! ## Locking
//!
//! The pool mutex guards the table only. It is never held while a file mutex
//! is taken: walks over the table clone the `Arc`s first, release the pool
//! lock and then lock each file in turn.

mod error;
mod invalidate;
mod migrate;
mod open;
mod symbol;

use config::PoolConfig;
use invalidate::InvalidateTask;
use parking_lot::Mutex;
use statfile::Statfile;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub use error::{PoolError, Result};
pub use migrate::{backup_path, BACKUP_SUFFIX};

/// Registry of memory-mapped statfiles shared by every classifier in the
/// process.
///
/// # Capacity
///
/// At most `max_files` statfiles are open at once. Exceeding the limit is a
/// hard error ([`PoolError::Capacity`]), never an eviction.
///
/// # Page locking
///
/// When enabled, every newly opened mapping is `mlock`ed. The first failure
/// (usually `RLIMIT_MEMLOCK`) disables locking for the rest of the pool's
/// life.
pub struct StatfilePool {
    pub(crate) files: Mutex<HashMap<PathBuf, Arc<Statfile>>>,
    pub(crate) max_files: usize,
    pub(crate) mlock_ok: AtomicBool,
    pub(crate) invalidate: Mutex<Option<InvalidateTask>>,
    /// Completed flush passes, periodic or on demand.
    pub(crate) invalidations: AtomicU64,
}

impl std::fmt::Debug for StatfilePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatfilePool")
            .field("opened", &self.opened())
            .field("max_files", &self.max_files)
            .field("mlock_ok", &self.mlock_ok())
            .field("invalidate_planned", &self.invalidate.lock().is_some())
            .field("invalidations", &self.invalidations())
            .finish()
    }
}

impl StatfilePool {
    /// Creates an empty pool.
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            max_files: config.max_open,
            mlock_ok: AtomicBool::new(config.mlock),
            invalidate: Mutex::new(None),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Returns the handle for `path` if the pool currently tracks it.
    pub fn is_open<P: AsRef<Path>>(&self, path: P) -> Option<Arc<Statfile>> {
        self.files.lock().get(path.as_ref()).cloned()
    }

    /// Number of statfiles currently open.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.files.lock().len()
    }

    /// Maximum number of statfiles open at once.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_files
    }

    /// `false` once page locking has been disabled (or was never enabled).
    #[must_use]
    pub fn mlock_ok(&self) -> bool {
        self.mlock_ok.load(Ordering::Relaxed)
    }

    /// Number of flush passes run so far.
    #[must_use]
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Stops the flush task and closes every open statfile.
    ///
    /// Handles still held by callers stay valid objects but are unmapped:
    /// lookups return `0.0` and writes fail.
    pub fn shutdown(&self) {
        if let Some(task) = self.invalidate.lock().take() {
            task.abort();
        }

        let files: Vec<Arc<Statfile>> = self.files.lock().drain().map(|(_, st)| st).collect();
        for st in files {
            st.lock().close();
        }
    }

    /// Clones every tracked handle so the pool lock can be released before
    /// any file lock is taken.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Statfile>> {
        self.files.lock().values().cloned().collect()
    }
}

impl Drop for StatfilePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
