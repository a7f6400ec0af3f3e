use crate::{PoolError, Result, StatfilePool};
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Timing of the periodic flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Schedule {
    pub(crate) period: Duration,
    pub(crate) jitter: Duration,
}

impl Schedule {
    /// `period` plus a uniform random extra delay in `[0, jitter]`.
    pub(crate) fn next_delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.period;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        self.period + Duration::from_millis(extra)
    }
}

/// The background flush task and the channel used to re-arm it.
pub(crate) struct InvalidateTask {
    schedule: watch::Sender<Schedule>,
    handle: JoinHandle<()>,
}

impl InvalidateTask {
    pub(crate) fn abort(self) {
        self.handle.abort();
    }
}

impl StatfilePool {
    /// Schedules a flush of every open statfile every `period` plus a random
    /// delay of up to `jitter`.
    ///
    /// The task runs on the current tokio runtime until the pool is shut down
    /// or dropped. Planning again while a task is pending only changes its
    /// timing; the new schedule starts counting immediately.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoRuntime`] when called outside a tokio runtime.
    pub fn plan_invalidate(self: &Arc<Self>, period: Duration, jitter: Duration) -> Result<()> {
        let schedule = Schedule { period, jitter };
        let mut task = self.invalidate.lock();

        if let Some(pending) = task.as_ref() {
            if !pending.handle.is_finished() && pending.schedule.send(schedule).is_ok() {
                debug!(?period, ?jitter, "re-armed statfile invalidation");
                return Ok(());
            }
        }

        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        let (tx, rx) = watch::channel(schedule);
        let handle = runtime.spawn(invalidate_loop(Arc::downgrade(self), rx));
        if let Some(old) = task.replace(InvalidateTask {
            schedule: tx,
            handle,
        }) {
            old.abort();
        }

        info!(?period, ?jitter, "planned statfile invalidation");
        Ok(())
    }

    /// Schedules asynchronous write-back of every open statfile.
    ///
    /// Mappings stay in place. Returns the number of files flushed.
    pub fn invalidate(&self) -> usize {
        let mut flushed = 0;
        for st in self.snapshot() {
            match st.lock().flush_async() {
                Ok(()) => flushed += 1,
                Err(e) => warn!(path = %st.path().display(), error = %e, "cannot sync statfile"),
            }
        }
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        flushed
    }

    /// Tries to `mlock` every open statfile.
    ///
    /// Does nothing once page locking is disabled. The first failure disables
    /// it and stops the walk.
    pub fn lockall(&self) {
        if !self.mlock_ok.load(Ordering::Relaxed) {
            return;
        }

        for st in self.snapshot() {
            if let Err(e) = st.lock().lock_pages() {
                warn!(
                    path = %st.path().display(),
                    error = %e,
                    "mlock of statfile failed, maybe you need to increase RLIMIT_MEMLOCK limit"
                );
                self.mlock_ok.store(false, Ordering::Relaxed);
                break;
            }
        }
    }
}

async fn invalidate_loop(pool: Weak<StatfilePool>, mut schedule: watch::Receiver<Schedule>) {
    loop {
        let delay = schedule.borrow_and_update().next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let flushed = pool.invalidate();
                debug!(flushed, "invalidated statfile pool");
            }
            changed = schedule.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
