// crates/server/src/lib.rs
//! Autofollow server library.
//!
//! Runs the follow job behind a small HTTP control surface and streams its
//! progress over a WebSocket.

pub mod config;
pub mod error;
pub mod hub;
pub mod jobs;
pub mod routes;
pub mod state;
pub mod traversal;

pub use config::{Cli, ConfigError, ServerConfig};
pub use error::*;
pub use hub::BroadcastHub;
pub use jobs::{JobController, JobError, SharedJobState};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - control, health and stream routes
/// - CORS allowing any origin
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use autofollow_core::testing::{Script, ScriptedDriverFactory};
    use autofollow_core::{Credentials, SiteProfile};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn app() -> Router {
        let site = SiteProfile::default();
        let factory = ScriptedDriverFactory::new(Script::default(), site.clone());
        let state = AppState::new(
            Arc::new(factory),
            site,
            Credentials::new("user", "pass"),
            state::DEFAULT_KEEPALIVE,
        );
        create_app(state)
    }

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = get(app(), "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
        assert!(body.contains("\"version\""));
        assert!(body.contains("\"uptime_secs\""));
    }

    #[tokio::test]
    async fn test_root_banner() {
        let (status, body) = get(app(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Auto Follow Backend API"));
    }

    #[tokio::test]
    async fn test_status_when_idle() {
        let (status, body) = get(app(), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["is_running"], false);
        assert_eq!(json["current_count"], 0);
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_cors_headers_present() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .header("Origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = get(app(), "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
