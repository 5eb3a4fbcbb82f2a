//! Axum router and HTTP handlers.
//!
//! `build_router` is the single entry point; `main.rs` attaches middleware
//! layers after this call so tests can drive the bare router.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;

use crate::api_types::{HealthyResponse, StatusResponse, UnhealthyResponse};
use crate::state::{uptime_secs, AppState};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status_handler))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Readiness probe: 200 when the store answers `SELECT 1` and the
/// scheduler is running, 503 otherwise. An exhausted pool fails the probe
/// through the 2s acquire timeout.
pub(crate) async fn health(State(st): State<Arc<AppState>>) -> Response {
    let timestamp = Utc::now().to_rfc3339();

    let body = match raceday_db::health_check(&st.pool).await {
        Ok(()) => {
            if st.scheduler.is_running().await {
                return secured(
                    StatusCode::OK,
                    Json(HealthyResponse {
                        status: "healthy",
                        timestamp,
                        database: "connected",
                        workers: "operational",
                    }),
                );
            }
            UnhealthyResponse {
                status: "unhealthy",
                timestamp,
                error: "scheduler is not running".to_string(),
            }
        }
        Err(err) => UnhealthyResponse {
            status: "unhealthy",
            timestamp,
            error: format!("{err:#}"),
        },
    };

    secured(StatusCode::SERVICE_UNAVAILABLE, Json(body))
}

// ---------------------------------------------------------------------------
// GET /status
// ---------------------------------------------------------------------------

/// Operational introspection for humans and dashboards' ops panels; not
/// the dashboard data API.
pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> Response {
    let snapshot = st.scheduler.snapshot().await;
    secured(
        StatusCode::OK,
        Json(StatusResponse {
            service: st.build.service,
            version: st.build.version,
            uptime_secs: uptime_secs(),
            scheduler: snapshot,
        }),
    )
}

/// Wrap a response with the hardening headers every endpoint carries.
fn secured(status: StatusCode, body: impl IntoResponse) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
