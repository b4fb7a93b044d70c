//! Health and banner endpoints.
//!
//! `/healthz` always answers 200 so the process is not restarted for a
//! configuration problem a restart cannot fix; the body says whether the
//! relay can actually dispatch.

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use serde_json::{Value, json};

use super::AppState;
use crate::github::GitHubApi;

/// Service name reported by `GET /`, kept from the relay this one replaces
/// so existing monitors keep matching.
pub const SERVICE_NAME: &str = "gh-dispatch-relay";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    /// Running, but an owner or credentials are missing.
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub dedup: DedupHealth,
}

#[derive(Debug, Serialize)]
pub struct DedupHealth {
    /// `redis`, `memory` or `disabled`.
    pub backend: &'static str,

    /// Operations served in memory because the remote store failed.
    pub fallbacks: u64,
}

/// Health check handler.
///
/// ```ignore
/// GET /healthz HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {"status":"ok","dedup":{"backend":"redis","fallbacks":0}}
/// ```
pub async fn health_handler<A: GitHubApi>(
    State(app_state): State<AppState<A>>,
) -> Json<HealthResponse> {
    let relay = app_state.relay();
    let status = if relay.is_ready() {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };
    Json(HealthResponse {
        status,
        dedup: DedupHealth {
            backend: relay.dedup().backend(),
            fallbacks: relay.dedup().fallback_count(),
        },
    })
}

pub async fn root_handler() -> Json<Value> {
    Json(json!({"service": SERVICE_NAME, "status": "ok"}))
}
