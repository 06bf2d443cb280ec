// crates/server/src/jobs/mod.rs
//! The follow job lifecycle.
//!
//! Provides:
//! - `SharedJobState`: the running flag and counters, shared with the job
//! - `JobController`: start/stop/status, one job at a time
//! - `JobError`: control-call rejections

pub mod controller;
pub mod state;
pub mod types;

pub use controller::JobController;
pub use state::SharedJobState;
pub use types::{JobError, JobId, JobOutcome, JobSnapshot, StartAck, StatusReport, StopReport};
