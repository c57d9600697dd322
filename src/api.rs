//! ==============================================================================
//! api.rs - read-only dashboard api
//! ==============================================================================
//!
//! routes:
//!     GET /api/dashboard/stats?days=N   stored readings, newest first
//!     GET /api/nodes                    registry snapshot + active count
//!     GET /*                            static site (if api.static_dir set)
//!
//! nothing here can mutate the registry or the store. cors allows GET and
//! OPTIONS from `api.cors_origins` only; `"*"` opens it to any origin.
//!
//! ==============================================================================

use crate::domain::AtmosphericReading;
use crate::leader::{LeaderRegistry, NodeStatus};
use crate::store::ReadingSink;
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<LeaderRegistry>,
    pub store: Arc<dyn ReadingSink>,
    /// window used when the request has no (valid) days parameter
    pub default_days: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsItem {
    pub timestamp: String,
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub altitude: f32,
    pub voc_index: f32,
    #[serde(rename = "unixTS")]
    pub unix_ts: i64,
    pub temperature_f: f32,
}

impl From<&AtmosphericReading> for StatsItem {
    fn from(r: &AtmosphericReading) -> Self {
        let timestamp = chrono::DateTime::<chrono::Utc>::from_timestamp(r.timestamp, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        Self {
            timestamp,
            temperature: r.temperature,
            humidity: r.humidity,
            pressure: r.pressure,
            altitude: r.altitude,
            voc_index: r.voc_index,
            unix_ts: r.timestamp,
            temperature_f: r.temperature_f(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodesResponse {
    pub active_nodes: usize,
    pub nodes: Vec<NodeStatus>,
}

/// stats query params
#[derive(Debug, Deserialize)]
pub struct StatsParams {
    days: Option<String>,
}

// ==============================================================================
// router
// ==============================================================================

pub fn router(state: ApiState, cors_origins: &[String], static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/api/dashboard/stats", get(stats_handler))
        .route("/api/nodes", get(nodes_handler))
        .layer(cors_layer(cors_origins))
        .with_state(state);

    match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    }
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow = match parse_origins(origins) {
        None => AllowOrigin::any(),
        Some(list) => AllowOrigin::list(list),
    };
    CorsLayer::new()
        .allow_origin(allow)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::LINK])
        .max_age(Duration::from_secs(300))
}

/// None means any origin. entries that are not valid header values are
/// skipped with a warning.
fn parse_origins(origins: &[String]) -> Option<Vec<HeaderValue>> {
    if origins.iter().any(|o| o == "*") {
        return None;
    }
    let list = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid cors origin");
                None
            }
        })
        .collect();
    Some(list)
}

pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> anyhow::Result<()> {
    axum::serve(listener, app).await?;
    Ok(())
}

// ==============================================================================
// handlers
// ==============================================================================

async fn stats_handler(State(state): State<ApiState>, Query(params): Query<StatsParams>) -> Response {
    let days = params
        .days
        .and_then(|d| d.parse::<u32>().ok())
        .unwrap_or(state.default_days);
    let since = Duration::from_secs(u64::from(days) * 86_400);

    let store = state.store.clone();
    let stats = match tokio::task::spawn_blocking(move || store.recent_readings(since)).await {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "dashboard stats db error");
            return error_response(e.to_string());
        }
        Err(e) => {
            tracing::error!(error = %e, "dashboard stats task failed");
            return error_response(e.to_string());
        }
    };

    if stats.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"message": "no stats found"})),
        )
            .into_response();
    }

    let items: Vec<StatsItem> = stats.iter().map(StatsItem::from).collect();
    Json(items).into_response()
}

async fn nodes_handler(State(state): State<ApiState>) -> Json<NodesResponse> {
    Json(NodesResponse {
        active_nodes: state.registry.active_count(),
        nodes: state.registry.snapshot(),
    })
}

fn error_response(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}
