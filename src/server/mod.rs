//! HTTP server for the relay.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Relays a scanner alert (other methods get a static
//!   acknowledgement)
//! - `GET /healthz` - `ok` or `degraded`, plus the dedup backend and its
//!   fallback count
//! - `GET /metrics` - Prometheus counters
//! - `GET /` - Service banner

use std::sync::Arc;

pub mod health;
pub mod webhook;

pub use health::{health_handler, root_handler};
pub use webhook::{webhook_handler, webhook_probe};

use crate::github::GitHubApi;
use crate::relay::Relay;
use crate::telemetry::serve_metrics;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<A: GitHubApi> {
    inner: Arc<AppStateInner<A>>,
}

struct AppStateInner<A: GitHubApi> {
    relay: Relay<A>,

    /// Shared secret expected in `X-ACS-Token`. `None` disables the check.
    webhook_secret: Option<String>,
}

impl<A: GitHubApi> AppState<A> {
    pub fn new(relay: Relay<A>, webhook_secret: Option<String>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                relay,
                webhook_secret: webhook_secret.filter(|s| !s.is_empty()),
            }),
        }
    }

    pub fn relay(&self) -> &Relay<A> {
        &self.inner.relay
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.inner.webhook_secret.as_deref()
    }
}

// Manual impl: `A` itself need not be `Clone`.
impl<A: GitHubApi> Clone for AppState<A> {
    fn clone(&self) -> Self {
        AppState {
            inner: self.inner.clone(),
        }
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<A: GitHubApi>(app_state: AppState<A>) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route(
            "/webhook",
            post(webhook_handler::<A>).fallback(webhook_probe),
        )
        .route("/healthz", get(health_handler::<A>))
        .route("/metrics", get(serve_metrics))
        .route("/", get(root_handler))
        .with_state(app_state)
}
