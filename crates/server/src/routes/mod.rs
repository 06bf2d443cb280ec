//! API route handlers for the autofollow server.

pub mod control;
pub mod health;
pub mod stream;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - GET  / - Service banner
/// - GET  /api/health - Health check
/// - GET  /api/status - Job status snapshot
/// - POST /api/start - Start the follow job
/// - POST /api/stop - Stop the follow job and wait for it
/// - GET  /ws - WebSocket progress stream
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::root_router())
        .nest("/api", health::router())
        .nest("/api", control::router())
        .merge(stream::router())
        .with_state(state)
}
