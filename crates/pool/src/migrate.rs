use crate::{PoolError, Result, StatfilePool};
use memmap2::Mmap;
use statfile::format::{LEGACY_VERSION, STATFILE_MAGIC};
use statfile::{
    Block, Header, Section, Statfile, StatfileError, BLOCK_BYTES, HEADER_BYTES, SECTION_BYTES,
    SECTION_COMMON,
};
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Suffix of the backup kept while a statfile is being resized.
pub const BACKUP_SUFFIX: &str = ".old";

/// `<path>.old`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

impl StatfilePool {
    /// Resizes the statfile at `path` to `size` bytes.
    ///
    /// The live file is renamed to `<path>.old`, a fresh file is created and
    /// opened in its place, and every non-empty block of every backup section
    /// is inserted again. Revision and revision time are carried over. The
    /// backup is deleted only after a complete copy; on any later failure it
    /// stays on disk and the error names it.
    ///
    /// A backup left by an earlier failed migration is never overwritten:
    /// the resize is refused with [`PoolError::BackupExists`] until the
    /// operator removes or restores it.
    pub(crate) fn migrate(&self, path: &Path, size: u64) -> Result<Arc<Statfile>> {
        let backup = backup_path(path);

        {
            let files = self.files.lock();
            if let Some(st) = files.get(path) {
                return Ok(Arc::clone(st));
            }

            if std::fs::symlink_metadata(&backup).is_ok() {
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    "backup of an earlier migration is still present, not migrating"
                );
                return Err(PoolError::BackupExists {
                    path: path.to_path_buf(),
                    backup,
                });
            }

            std::fs::rename(path, &backup)
                .map_err(|e| {
                    info!(
                        path = %path.display(),
                        backup = %backup.display(),
                        error = %e,
                        "cannot rename statfile"
                    );
                    e
                })
                .map_err(PoolError::io(path))?;
        }

        self.migrate_into(path, &backup, size).map_err(|e| {
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %e,
                "statfile migration failed, backup kept"
            );
            PoolError::Migration {
                path: path.to_path_buf(),
                backup: backup.clone(),
                source: Box::new(e),
            }
        })
    }

    fn migrate_into(&self, path: &Path, backup: &Path, size: u64) -> Result<Arc<Statfile>> {
        self.create(path, size)?;
        let st = self.open(path, size, true)?;

        if let Err(e) = copy_from_backup(&st, backup) {
            if let Err(close_err) = self.close(&st) {
                warn!(
                    path = %path.display(),
                    error = %close_err,
                    "cannot close half migrated statfile"
                );
            }
            return Err(e);
        }

        std::fs::remove_file(backup).map_err(PoolError::io(backup))?;
        info!(path = %path.display(), size, "migrated statfile");
        Ok(st)
    }
}

/// Copies blocks and revision from the backup at `backup` into `st`.
///
/// Sections are walked in file order. A section that runs past the end of
/// the backup contributes the blocks that are fully present and ends the
/// walk. A backup too short to hold its first section header is an error.
fn copy_from_backup(st: &Statfile, backup: &Path) -> Result<()> {
    let file = File::open(backup).map_err(PoolError::io(backup))?;
    // SAFETY: the backup was renamed away from its live path under the pool
    // lock; nothing else maps or writes it while it is read here.
    let map = unsafe { Mmap::map(&file) }.map_err(PoolError::io(backup))?;

    if map.len() < STATFILE_MAGIC.len() || map[..STATFILE_MAGIC.len()] != STATFILE_MAGIC {
        info!(path = %backup.display(), "backup is not a statfile");
        return Err(StatfileError::BadMagic {
            path: backup.to_path_buf(),
        }
        .into());
    }
    if map.len() < HEADER_BYTES + SECTION_BYTES {
        info!(path = %backup.display(), len = map.len(), "backup has no section table");
        return Err(StatfileError::TooSmall {
            path: backup.to_path_buf(),
            len: map.len() as u64,
        }
        .into());
    }

    let header = Header::decode(&map).map_err(PoolError::io(backup))?;
    // 1.0 headers have no revision fields.
    let (revision, rev_time) = if header.version == LEGACY_VERSION {
        (0, 0)
    } else {
        (header.revision, header.rev_time)
    };

    let mut copied = 0u64;
    let mut off = HEADER_BYTES;
    while let Some(sec) = Section::decode_at(&map, off) {
        let first = off + SECTION_BYTES;
        let present = ((map.len() - first) / BLOCK_BYTES) as u64;
        let count = sec.length.min(present);
        if count < sec.length {
            warn!(
                path = %backup.display(),
                code = sec.code,
                declared = sec.length,
                present,
                "backup section is truncated, copying the blocks present"
            );
        }

        if count > 0 {
            let mut guard = st.lock();
            if !guard.set_section(sec.code, true) {
                guard.add_section(sec.code, count)?;
                if !guard.set_section(sec.code, true) {
                    return Err(StatfileError::InvalidSection { code: sec.code }.into());
                }
            }
        }

        for i in 0..count {
            let block = Block::decode_at(&map, first + i as usize * BLOCK_BYTES);
            if block.hash1 == 0 || block.value == 0.0 {
                continue;
            }

            let mut guard = st.lock();
            if guard.get_section() != sec.code && !guard.set_section(sec.code, true) {
                return Err(StatfileError::InvalidSection { code: sec.code }.into());
            }
            guard.set_block(block.hash1, block.hash2, block.value)?;
            copied += 1;
        }
        debug!(path = %backup.display(), code = sec.code, blocks = count, "copied section");

        if count < sec.length {
            break;
        }
        off = first + count as usize * BLOCK_BYTES;
    }

    let mut guard = st.lock();
    guard.set_revision(revision, rev_time)?;
    guard.set_section(SECTION_COMMON, true);
    debug!(path = %backup.display(), blocks = copied, "copied blocks from backup");
    Ok(())
}
