// crates/core/src/progress.rs
//! Progress messages pushed to stream subscribers.
//!
//! Every message is encoded through [`ProgressMessage::to_json`]; call sites
//! never build payloads by hand.

use serde::{Deserialize, Serialize};

/// Why a job ended on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The goal was reached.
    Completed,
    /// No further qualifying items or pages were available.
    Exhausted,
}

impl TerminalReason {
    /// Human-readable summary embedding the final counts.
    pub fn summary(self, current_count: u32, target_count: u32) -> String {
        match self {
            Self::Completed => format!("完了！目標の{target_count}人をフォローしました。"),
            Self::Exhausted => {
                format!("これ以上フォローできる人がいません。{current_count}人をフォローしました。")
            }
        }
    }
}

/// Wire messages of the streaming channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressMessage {
    /// Snapshot sent once to a freshly connected subscriber.
    Status {
        is_running: bool,
        target_count: u32,
        current_count: u32,
    },
    Update {
        is_running: bool,
        current_count: u32,
        target_count: u32,
        timestamp: String,
    },
    #[serde(rename = "ping")]
    Keepalive,
    Terminal {
        reason: TerminalReason,
        is_running: bool,
        current_count: u32,
        target_count: u32,
        summary: String,
        timestamp: String,
    },
}

impl ProgressMessage {
    pub fn update(is_running: bool, current_count: u32, target_count: u32) -> Self {
        Self::Update {
            is_running,
            current_count,
            target_count,
            timestamp: now_rfc3339(),
        }
    }

    pub fn terminal(reason: TerminalReason, current_count: u32, target_count: u32) -> Self {
        Self::Terminal {
            reason,
            is_running: false,
            current_count,
            target_count,
            summary: reason.summary(current_count, target_count),
            timestamp: now_rfc3339(),
        }
    }

    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to encode progress message");
            String::from(r#"{"type":"error"}"#)
        })
    }

    /// Progress count carried by the message, if any.
    pub fn current_count(&self) -> Option<u32> {
        match self {
            Self::Status { current_count, .. }
            | Self::Update { current_count, .. }
            | Self::Terminal { current_count, .. } => Some(*current_count),
            Self::Keepalive => None,
        }
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
