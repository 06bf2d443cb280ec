// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use autofollow_core::{Credentials, DriverFactory, SiteProfile};

use crate::hub::BroadcastHub;
use crate::jobs::{JobController, SharedJobState};

/// Default idle time before a stream subscriber is sent a keepalive.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Running flag and counters of the follow job.
    pub job_state: Arc<SharedJobState>,
    /// Live stream subscribers.
    pub hub: Arc<BroadcastHub>,
    pub jobs: JobController,
    /// Inbound silence after which a subscriber gets a `ping`.
    pub keepalive: Duration,
}

impl AppState {
    /// Wire up the job state, hub and controller around `factory`.
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        site: SiteProfile,
        credentials: Credentials,
        keepalive: Duration,
    ) -> Arc<Self> {
        let job_state = Arc::new(SharedJobState::new());
        let hub = Arc::new(BroadcastHub::new(Arc::clone(&job_state)));
        let jobs = JobController::new(
            Arc::clone(&job_state),
            Arc::clone(&hub),
            factory,
            site,
            credentials,
        );
        Arc::new(Self {
            start_time: Instant::now(),
            job_state,
            hub,
            jobs,
            keepalive,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
