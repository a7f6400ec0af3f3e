use crate::{PoolError, Result, StatfilePool};
use statfile::{MappedFile, Statfile, StatfileGuard, StatfileWriter, MIN_FILE_BYTES};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl StatfilePool {
    /// Opens the statfile at `path`, or returns the handle the pool already
    /// holds for it.
    ///
    /// # Steps
    ///
    /// 1. A tracked path returns its existing handle.
    /// 2. A full pool is a hard [`PoolError::Capacity`] error.
    /// 3. Unless `forced`, a file whose size differs from `desired_size` by
    ///    more than two minimal files is migrated to the new size instead.
    /// 4. The file is mapped and validated, optionally `mlock`ed, advised for
    ///    sequential access and touched page by page.
    ///
    /// A `desired_size` too small for any block is logged and ignored: the
    /// file is opened as it is.
    pub fn open<P: AsRef<Path>>(
        &self,
        path: P,
        desired_size: u64,
        forced: bool,
    ) -> Result<Arc<Statfile>> {
        let path = path.as_ref();
        let mut files = self.files.lock();

        if let Some(st) = files.get(path) {
            return Ok(Arc::clone(st));
        }

        if files.len() >= self.max_files {
            error!(
                max = self.max_files,
                "reached hard coded limit of statfiles opened, consider increasing the limit"
            );
            return Err(PoolError::Capacity {
                max: self.max_files,
            });
        }

        let actual = std::fs::metadata(path)
            .map_err(|e| {
                info!(path = %path.display(), error = %e, "cannot stat file");
                e
            })
            .map_err(PoolError::io(path))?
            .len();

        let min = MIN_FILE_BYTES as u64;
        if !forced && actual.abs_diff(desired_size) > 2 * min && desired_size > min {
            drop(files);
            warn!(
                path = %path.display(),
                actual,
                desired = desired_size,
                "need to migrate statfile as it has other size than needed"
            );
            return self.migrate(path, desired_size);
        }

        if desired_size < min {
            error!(path = %path.display(), desired = desired_size, "needed size is too small");
        }

        let mapped = MappedFile::open(path)?;

        if self.mlock_ok.load(Ordering::Relaxed) {
            if let Err(e) = mapped.lock_pages() {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "mlock of statfile failed, maybe you need to increase RLIMIT_MEMLOCK limit"
                );
                self.mlock_ok.store(false, Ordering::Relaxed);
            }
        }

        if let Err(e) = mapped.advise_sequential() {
            info!(path = %path.display(), error = %e, "madvise failed");
        }
        mapped.preload();

        let st = Arc::new(Statfile::new(mapped));
        files.insert(path.to_path_buf(), Arc::clone(&st));
        debug!(path = %path.display(), opened = files.len(), "opened statfile");
        Ok(st)
    }

    /// Creates a new zero-filled statfile of `size` bytes at `path`.
    ///
    /// Creating a path the pool already tracks is a successful no-op. The new
    /// file is not opened.
    pub fn create<P: AsRef<Path>>(&self, path: P, size: u64) -> Result<()> {
        let path = path.as_ref();
        let files = self.files.lock();

        if files.contains_key(path) {
            return Ok(());
        }

        if size < MIN_FILE_BYTES as u64 {
            error!(path = %path.display(), size, "cannot create statfile: size is too small");
            return Err(PoolError::TooSmall {
                path: path.to_path_buf(),
                size,
            });
        }

        StatfileWriter::create(path, size).map_err(|e| {
            error!(path = %path.display(), error = %e, "cannot create statfile");
            e
        })?;
        Ok(())
    }

    /// Removes `handle` from the pool, then flushes and unmaps it.
    ///
    /// Returns [`PoolError::NotOpen`] if the pool does not track this exact
    /// handle (for instance a handle from before a previous close).
    pub fn close(&self, handle: &Arc<Statfile>) -> Result<()> {
        let removed = {
            let mut files = self.files.lock();
            match files.get(handle.path()) {
                Some(st) if Arc::ptr_eq(st, handle) => files.remove(handle.path()),
                _ => None,
            }
        };

        let Some(st) = removed else {
            info!(path = %handle.path().display(), "file is not opened");
            return Err(PoolError::NotOpen {
                path: handle.path().to_path_buf(),
            });
        };

        st.lock().close();
        Ok(())
    }

    /// Takes the per-file lock of `handle`.
    ///
    /// All block reads and writes go through the returned guard.
    pub fn lock_file<'a>(&self, handle: &'a Statfile) -> StatfileGuard<'a> {
        handle.lock()
    }

    /// Releases a guard obtained from [`lock_file`](Self::lock_file).
    pub fn unlock_file(&self, guard: StatfileGuard<'_>) {
        drop(guard);
    }
}
