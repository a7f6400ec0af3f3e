use crate::StatfilePool;
use config::PoolConfig;
use statfile::{BLOCK_BYTES, HEADER_BYTES, SECTION_BYTES};
use std::path::{Path, PathBuf};

/// Bytes needed for a statfile whose single section holds `blocks` blocks.
pub fn size_for_blocks(blocks: u64) -> u64 {
    (HEADER_BYTES + SECTION_BYTES) as u64 + blocks * BLOCK_BYTES as u64
}

pub fn pool() -> StatfilePool {
    StatfilePool::new(&PoolConfig::default())
}

pub fn pool_with_capacity(max_open: usize) -> StatfilePool {
    StatfilePool::new(&PoolConfig {
        max_open,
        ..PoolConfig::default()
    })
}

/// Creates a statfile of `blocks` blocks under `dir` through `pool`.
pub fn new_file(pool: &StatfilePool, dir: &Path, name: &str, blocks: u64) -> PathBuf {
    let path = dir.join(name);
    pool.create(&path, size_for_blocks(blocks)).unwrap();
    path
}

pub fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}
