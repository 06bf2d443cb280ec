// crates/server/src/jobs/types.rs
//! Types for the follow job lifecycle.

use serde::Serialize;
use thiserror::Error;

/// Generation number of a job. A fresh `start` always gets a new one, so a
/// finished job can never touch the counters of its successor.
pub type JobId = u64;

/// Control-call rejections. The display strings are the reasons returned to
/// HTTP callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Already running")]
    AlreadyRunning,

    #[error("Not currently running")]
    NotRunning,

    #[error("target_count must be > 0")]
    InvalidTarget(i64),

    #[error("target_count must be at most {max}")]
    TargetTooLarge { requested: i64, max: u32 },
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// `current_count` reached `target_count`.
    Completed,
    /// No next page, nothing left to act on.
    Exhausted,
    /// Cancelled by `stop`.
    Stopped,
    /// Sign-in failed or the driver session was lost.
    Failed(String),
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Exhausted => "exhausted",
            Self::Stopped => "stopped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Consistent read of the shared counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub is_running: bool,
    pub target_count: u32,
    pub current_count: u32,
}

/// Body of a successful `start`.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct StartAck {
    pub message: String,
    pub target_count: u32,
}

/// Body of a successful `stop`.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct StopReport {
    pub message: String,
    pub completed_count: u32,
    pub target_count: u32,
}

/// Body of `status`.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct StatusReport {
    pub is_running: bool,
    pub target_count: u32,
    pub current_count: u32,
    pub timestamp: String,
}
