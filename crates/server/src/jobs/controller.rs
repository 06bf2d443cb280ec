// crates/server/src/jobs/controller.rs
//! Start/stop/status contract over the single follow job.

use std::sync::Arc;

use autofollow_core::{now_rfc3339, Credentials, DriverFactory, SiteProfile};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::SharedJobState;
use super::types::{JobError, JobId, JobOutcome, StartAck, StatusReport, StopReport};
use crate::hub::BroadcastHub;
use crate::traversal::{run_job, JobContext};

struct ActiveJob {
    id: JobId,
    cancel: CancellationToken,
    handle: JoinHandle<JobOutcome>,
}

/// Owns the background job and enforces that at most one runs at a time.
///
/// `start` and `stop` serialize on the active-job slot; `status` only reads
/// [`SharedJobState`] and never waits on them.
pub struct JobController {
    state: Arc<SharedJobState>,
    hub: Arc<BroadcastHub>,
    factory: Arc<dyn DriverFactory>,
    site: Arc<SiteProfile>,
    credentials: Arc<Credentials>,
    active: Mutex<Option<ActiveJob>>,
}

impl JobController {
    pub fn new(
        state: Arc<SharedJobState>,
        hub: Arc<BroadcastHub>,
        factory: Arc<dyn DriverFactory>,
        site: SiteProfile,
        credentials: Credentials,
    ) -> Self {
        Self {
            state,
            hub,
            factory,
            site: Arc::new(site),
            credentials: Arc::new(credentials),
            active: Mutex::new(None),
        }
    }

    /// Begin a job that acts on up to `target_count` items.
    pub async fn start(&self, target_count: i64) -> Result<StartAck, JobError> {
        let mut active = self.active.lock().await;

        if self.state.is_running() {
            return Err(JobError::AlreadyRunning);
        }
        if target_count <= 0 {
            return Err(JobError::InvalidTarget(target_count));
        }
        let target = u32::try_from(target_count).map_err(|_| JobError::TargetTooLarge {
            requested: target_count,
            max: u32::MAX,
        })?;

        // A previous job that ended on its own has already released the
        // counters; reap its task before replacing it.
        if let Some(previous) = active.take() {
            if let Err(e) = previous.handle.await {
                tracing::error!(job_id = previous.id, error = %e, "previous follow job panicked");
            }
        }

        let id = self.state.try_begin(target)?;
        let cancel = CancellationToken::new();
        let ctx = JobContext {
            job_id: id,
            target_count: target,
            state: Arc::clone(&self.state),
            hub: Arc::clone(&self.hub),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(run_job(
            ctx,
            Arc::clone(&self.factory),
            Arc::clone(&self.site),
            Arc::clone(&self.credentials),
        ));
        *active = Some(ActiveJob { id, cancel, handle });

        Ok(StartAck {
            message: "Follow process started".into(),
            target_count: target,
        })
    }

    /// Cancel the running job and wait until it has released its driver.
    pub async fn stop(&self) -> Result<StopReport, JobError> {
        let mut active = self.active.lock().await;

        if !self.state.is_running() {
            return Err(JobError::NotRunning);
        }
        let Some(job) = active.take() else {
            return Err(JobError::NotRunning);
        };

        tracing::info!(job_id = job.id, "stopping follow job");
        job.cancel.cancel();
        match job.handle.await {
            Ok(outcome) => tracing::debug!(job_id = job.id, outcome = outcome.label(), "follow job joined"),
            Err(e) => tracing::error!(job_id = job.id, error = %e, "follow job panicked"),
        }

        let snap = self.state.finish(job.id);
        Ok(StopReport {
            message: "Follow process stopped".into(),
            completed_count: snap.current_count,
            target_count: snap.target_count,
        })
    }

    pub fn status(&self) -> StatusReport {
        let snap = self.state.snapshot();
        StatusReport {
            is_running: snap.is_running,
            target_count: snap.target_count,
            current_count: snap.current_count,
            timestamp: now_rfc3339(),
        }
    }

    /// Cancel whatever is running and wait for it. Used on shutdown.
    pub async fn shutdown(&self) {
        let job = self.active.lock().await.take();
        if let Some(job) = job {
            job.cancel.cancel();
            if let Err(e) = job.handle.await {
                tracing::error!(job_id = job.id, error = %e, "follow job panicked during shutdown");
            }
            self.state.finish(job.id);
        }
    }
}
