//! Job control endpoints.
//!
//! - POST /api/start  `{"target_count": n}`
//! - POST /api/stop
//! - GET  /api/status

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::jobs::{StartAck, StatusReport, StopReport};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    /// Signed so that non-positive values reach the controller and get the
    /// documented rejection instead of a deserialization error.
    pub target_count: i64,
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> ApiResult<Json<StartAck>> {
    let Json(req) = body?;
    let ack = state.jobs.start(req.target_count).await?;
    Ok(Json(ack))
}

pub async fn stop(State(state): State<Arc<AppState>>) -> ApiResult<Json<StopReport>> {
    Ok(Json(state.jobs.stop().await?))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.jobs.status())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/status", get(status))
}
