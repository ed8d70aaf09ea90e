//! Health and version endpoints
//!
//! `/health` is a liveness check: it answers 200 whenever the process is
//! serving, and reports cache counters for operators.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::json_response;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    /// Seconds since the server state was built
    pub uptime: u64,
    pub mode: &'static str,
    pub node_id: String,
    pub timestamp: String,
    pub credentials: CredentialHealth,
    pub feeds: usize,
}

#[derive(Serialize)]
pub struct CredentialHealth {
    pub cached: usize,
    pub lookups: u64,
    pub hits: u64,
    pub loads: u64,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let store = state.gateway.credentials();
    let stats = store.stats();

    HealthResponse {
        status: "ok",
        service: "hubkeeper",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        node_id: state.args.node_id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        credentials: CredentialHealth {
            cached: store.len(),
            lookups: stats.lookups.load(Ordering::Relaxed),
            hits: stats.hits.load(Ordering::Relaxed),
            loads: stats.loads.load(Ordering::Relaxed),
        },
        feeds: state.feeds.len(),
    }
}

/// GET /health, /healthz
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &build_health_response(&state))
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// GET /version
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "hubkeeper",
    };
    json_response(StatusCode::OK, &response)
}
