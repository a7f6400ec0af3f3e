use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while opening, validating or mutating a statfile.
#[derive(Debug, Error)]
pub enum StatfileError {
    /// An underlying I/O error (open, stat, mmap, write, fsync).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file (or the requested size) cannot hold a header, a section and
    /// one block.
    #[error("{path}: too small to carry any statistic ({len} bytes)")]
    TooSmall { path: PathBuf, len: u64 },

    /// The first three bytes are not the statfile signature.
    #[error("{path}: invalid statfile magic")]
    BadMagic { path: PathBuf },

    /// The version bytes are neither current nor the upgradable legacy one.
    #[error("{path}: invalid statfile version {major}.{minor}")]
    UnknownVersion { path: PathBuf, major: u8, minor: u8 },

    /// A section declares more blocks than the file holds.
    #[error("{path}: truncated section: {need} bytes declared, {have} available")]
    Truncated {
        path: PathBuf,
        need: u64,
        have: u64,
    },

    /// The first section declares zero blocks.
    #[error("{path}: first section has no blocks")]
    EmptySection { path: PathBuf },

    /// A section with zero length was requested.
    #[error("invalid section {code}: length must be > 0")]
    InvalidSection { code: u64 },

    /// The handle was closed and its mapping released.
    #[error("{path}: statfile is closed")]
    Closed { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, StatfileError>;
