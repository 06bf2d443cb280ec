// crates/server/src/jobs/state.rs
//! Process-wide job counters.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::types::{JobError, JobId, JobSnapshot};

#[derive(Debug, Default)]
struct Inner {
    is_running: bool,
    target_count: u32,
    current_count: u32,
    /// Generation of the job that currently owns the counters.
    job_id: JobId,
}

/// Single source of truth for whether a job is active and how far it got.
///
/// Every transition takes the write lock once, so a concurrent
/// [`snapshot`](Self::snapshot) never sees a half-applied update.
#[derive(Debug, Default)]
pub struct SharedJobState {
    inner: RwLock<Inner>,
}

impl SharedJobState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned reading job state: {e}");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned writing job state: {e}");
            e.into_inner()
        })
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.read();
        JobSnapshot {
            is_running: inner.is_running,
            target_count: inner.target_count,
            current_count: inner.current_count,
        }
    }

    pub fn is_running(&self) -> bool {
        self.read().is_running
    }

    /// Mark a new job as running with `target_count` and a zeroed counter.
    ///
    /// Fails without touching anything if a job is already running.
    pub fn try_begin(&self, target_count: u32) -> Result<JobId, JobError> {
        let mut inner = self.write();
        if inner.is_running {
            return Err(JobError::AlreadyRunning);
        }
        inner.job_id += 1;
        inner.is_running = true;
        inner.target_count = target_count;
        inner.current_count = 0;
        Ok(inner.job_id)
    }

    /// Count one completed action for `job_id`.
    ///
    /// Returns the new count, or `None` if `job_id` no longer owns the
    /// counters, is not running, or has already reached its target.
    pub fn increment(&self, job_id: JobId) -> Option<u32> {
        let mut inner = self.write();
        if inner.job_id != job_id || !inner.is_running || inner.current_count >= inner.target_count
        {
            return None;
        }
        inner.current_count += 1;
        Some(inner.current_count)
    }

    /// Mark `job_id` as no longer running. Idempotent; ignores stale ids.
    pub fn finish(&self, job_id: JobId) -> JobSnapshot {
        let mut inner = self.write();
        if inner.job_id == job_id {
            inner.is_running = false;
        }
        JobSnapshot {
            is_running: inner.is_running,
            target_count: inner.target_count,
            current_count: inner.current_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn begin_resets_counter() {
        let state = SharedJobState::new();
        let first = state.try_begin(2).unwrap();
        assert_eq!(state.increment(first), Some(1));
        state.finish(first);

        let second = state.try_begin(5).unwrap();
        assert_ne!(first, second);
        let snap = state.snapshot();
        assert!(snap.is_running);
        assert_eq!(snap.target_count, 5);
        assert_eq!(snap.current_count, 0);
    }

    #[test]
    fn begin_while_running_is_rejected() {
        let state = SharedJobState::new();
        let id = state.try_begin(3).unwrap();
        state.increment(id);
        assert_eq!(state.try_begin(9), Err(JobError::AlreadyRunning));

        let snap = state.snapshot();
        assert_eq!(snap.target_count, 3);
        assert_eq!(snap.current_count, 1);
    }

    #[test]
    fn increment_stops_at_target() {
        let state = SharedJobState::new();
        let id = state.try_begin(2).unwrap();
        assert_eq!(state.increment(id), Some(1));
        assert_eq!(state.increment(id), Some(2));
        assert_eq!(state.increment(id), None);
        assert_eq!(state.snapshot().current_count, 2);
    }

    #[test]
    fn stale_job_cannot_touch_successor() {
        let state = SharedJobState::new();
        let old = state.try_begin(5).unwrap();
        state.finish(old);
        let new = state.try_begin(5).unwrap();

        assert_eq!(state.increment(old), None);
        state.finish(old);
        assert!(state.is_running());
        assert_eq!(state.increment(new), Some(1));
    }

    #[test]
    fn finish_is_idempotent() {
        let state = SharedJobState::new();
        let id = state.try_begin(1).unwrap();
        let a = state.finish(id);
        let b = state.finish(id);
        assert_eq!(a, b);
        assert!(!a.is_running);
    }

    #[test]
    fn concurrent_increments_never_exceed_target() {
        let state = Arc::new(SharedJobState::new());
        let id = state.try_begin(100).unwrap();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        state.increment(id);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(state.snapshot().current_count, 100);
    }
}
