use std::io;
use std::path::PathBuf;

use statfile::StatfileError;
use thiserror::Error;

/// Errors returned by [`StatfilePool`](crate::StatfilePool) operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Opening, validating or mutating the statfile itself failed.
    #[error("statfile error: {0}")]
    Statfile(#[from] StatfileError),

    /// A filesystem operation on `path` failed (stat, rename, unlink, map).
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The pool already tracks its maximum number of open statfiles.
    #[error("too many opened statfiles: {max}, consider increasing the limit")]
    Capacity { max: usize },

    /// A statfile was requested with a size that cannot hold one block.
    #[error("{path}: size {size} is too small to carry any statistic")]
    TooSmall { path: PathBuf, size: u64 },

    /// The handle is not (or no longer) tracked by this pool.
    #[error("{path}: statfile is not open in this pool")]
    NotOpen { path: PathBuf },

    /// The classifier declares no statfile for the symbol.
    #[error("classifier {classifier}: no statfile for symbol {symbol}")]
    UnknownSymbol { classifier: String, symbol: String },

    /// Resizing failed after the live file was moved aside.
    #[error("{path}: migration failed, old data kept at {backup}: {source}")]
    Migration {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: Box<PoolError>,
    },

    /// A backup from an earlier failed migration still sits next to the
    /// statfile; resizing again would overwrite it.
    #[error("{path}: backup {backup} from an earlier migration must be restored or removed first")]
    BackupExists { path: PathBuf, backup: PathBuf },

    /// `plan_invalidate` was called outside a tokio runtime.
    #[error("no tokio runtime available to schedule the flush task")]
    NoRuntime,
}

impl PoolError {
    /// `true` for conditions that need operator attention rather than a
    /// retry or a fallback: capacity exhaustion and a leftover migration
    /// backup.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PoolError::Capacity { .. } | PoolError::BackupExists { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> PoolError {
        let path = path.into();
        move |source| PoolError::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
