mod block_tests;

use crate::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Bytes needed for a statfile whose single section holds `blocks` blocks.
pub(crate) fn size_for_blocks(blocks: u64) -> u64 {
    (HEADER_BYTES + SECTION_BYTES) as u64 + blocks * BLOCK_BYTES as u64
}

/// Creates and opens a fresh statfile with `blocks` blocks.
pub(crate) fn fresh(dir: &TempDir, name: &str, blocks: u64) -> anyhow::Result<(PathBuf, MappedFile)> {
    let path = dir.path().join(name);
    StatfileWriter::create(&path, size_for_blocks(blocks))?;
    let mapped = MappedFile::open(&path)?;
    Ok((path, mapped))
}

/// Reads the raw bytes of a file.
pub(crate) fn raw(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}
