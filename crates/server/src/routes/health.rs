//! Liveness endpoints.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Response for the health check endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub subscribers: usize,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct BannerResponse {
    pub message: String,
}

/// GET / - Service banner.
pub async fn banner() -> Json<BannerResponse> {
    Json(BannerResponse {
        message: "Auto Follow Backend API".to_string(),
    })
}

/// GET /api/health - Server status, version, uptime and live subscriber count.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        subscribers: state.hub.subscriber_count(),
    })
}

pub fn root_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(banner))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            uptime_secs: 42,
            subscribers: 2,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"uptime_secs\":42"));
        assert!(json.contains("\"subscribers\":2"));
    }

    #[tokio::test]
    async fn banner_names_the_service() {
        let Json(body) = banner().await;
        assert_eq!(body.message, "Auto Follow Backend API");
    }
}
