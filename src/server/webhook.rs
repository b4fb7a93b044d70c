//! Webhook endpoint handler.
//!
//! Accepts scanner alerts, checks the shared secret, and runs the alert
//! through the relay synchronously so the scanner learns the outcome (and
//! can retry on 5xx).

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;
use crate::github::GitHubApi;
use crate::relay::RelayError;

/// Header carrying the shared webhook secret.
pub const HEADER_TOKEN: &str = "x-acs-token";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid token")]
    InvalidToken,

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid query string: {0}")]
    InvalidQuery(#[from] QueryRejection),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidToken => StatusCode::UNAUTHORIZED,
            WebhookError::InvalidJson(_) | WebhookError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            WebhookError::Relay(e) => relay_status(e),
        }
    }
}

/// Maps a relay failure onto the status returned to the scanner.
pub fn relay_status(err: &RelayError) -> StatusCode {
    match err {
        RelayError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        RelayError::PolicyDenied { .. } | RelayError::PolicyCheck { .. } => StatusCode::FORBIDDEN,
        RelayError::Transport(_) if err.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Transport(_) => StatusCode::BAD_GATEWAY,
        // GitHub's own error status is passed through.
        RelayError::Upstream { status, .. } => StatusCode::from_u16(*status)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY),
        RelayError::Configuration(_)
        | RelayError::Signing(_)
        | RelayError::Resolution { .. }
        | RelayError::TokenExchange { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let body = json!({"ok": false, "detail": self.to_string()});
        (self.status_code(), Json(body)).into_response()
    }
}

/// Query parameters accepted on `/webhook`.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookParams {
    /// Overrides the configured event type for this alert.
    pub event_type: Option<String>,
}

/// Body of a successful webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub ok: bool,
    pub repository: String,
    pub deduped: bool,
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Header `X-ACS-Token`: the shared secret, when one is configured
/// - Query `event_type` (optional): overrides the configured event type
/// - Body: the scanner's alert JSON, any shape
///
/// # Response
///
/// - 200 `{"ok":true,"repository":"owner/repo","deduped":false}`
/// - 400 malformed JSON or query string, or no image in the alert
/// - 401 wrong or missing secret
/// - 403 topic policy denied, or topics could not be checked
/// - 4xx/5xx GitHub's dispatch status, passed through
/// - 500 local configuration or credential failure
/// - 502/504 GitHub unreachable or timed out
///
/// Every error body is `{"ok":false,"detail":"..."}`.
pub async fn webhook_handler<A: GitHubApi>(
    State(app_state): State<AppState<A>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, WebhookError> {
    // Checked before the query string or body is parsed.
    if let Some(secret) = app_state.webhook_secret()
        && !token_matches(&headers, secret)
    {
        warn!("Rejected webhook with invalid token");
        return Err(WebhookError::InvalidToken);
    }

    let Query(params) = Query::<WebhookParams>::try_from_uri(&uri)?;
    let alert: serde_json::Value = serde_json::from_slice(&body)?;
    debug!(bytes = body.len(), "Received alert");

    let outcome = app_state
        .relay()
        .handle(alert, params.event_type.as_deref())
        .await?;

    Ok(Json(WebhookResponse {
        ok: true,
        repository: outcome.repository.to_string(),
        deduped: outcome.deduped,
    }))
}

/// Answer for non-POST requests to `/webhook`, so probes and browsers get
/// something other than 405.
pub async fn webhook_probe() -> Json<serde_json::Value> {
    Json(json!({"ok": true, "detail": "send alerts with POST"}))
}

/// Compares the `X-ACS-Token` header against `secret` in constant time.
fn token_matches(headers: &HeaderMap, secret: &str) -> bool {
    let provided = headers
        .get(HEADER_TOKEN)
        .map(|v| v.as_bytes())
        .unwrap_or_default();
    provided.ct_eq(secret.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::ApiError;
    use crate::payload::ExtractError;
    use crate::relay::TopicMatchMode;
    use crate::types::RepoId;
    use axum::http::HeaderValue;
    use std::time::Duration;

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_TOKEN, HeaderValue::from_str(token).unwrap());
        headers
    }

    #[test]
    fn token_comparison() {
        assert!(token_matches(&headers_with("s3cret"), "s3cret"));
        assert!(!token_matches(&headers_with("s3cre"), "s3cret"));
        assert!(!token_matches(&headers_with("s3cret!"), "s3cret"));
        assert!(!token_matches(&HeaderMap::new(), "s3cret"));
    }

    #[test]
    fn status_mapping() {
        let repo = RepoId::new("acme", "widget");
        let cases = [
            (RelayError::MalformedPayload(ExtractError::MissingImage), 400),
            (RelayError::Configuration("GH_OWNER is not set".into()), 500),
            (
                RelayError::PolicyDenied {
                    repo: repo.clone(),
                    mode: TopicMatchMode::Any,
                    required: vec!["stackrox-copa".into()],
                },
                403,
            ),
            (
                RelayError::PolicyCheck {
                    repo: repo.clone(),
                    source: ApiError::transport("GET /topics", "refused"),
                },
                403,
            ),
            (
                RelayError::Transport(ApiError::transport("POST /dispatches", "refused")),
                502,
            ),
            (
                RelayError::Transport(ApiError::Timeout {
                    endpoint: "POST /dispatches".into(),
                    timeout: Duration::from_secs(30),
                }),
                504,
            ),
            (
                RelayError::Upstream {
                    status: 422,
                    body: String::new(),
                },
                422,
            ),
            (
                RelayError::Upstream {
                    status: 503,
                    body: String::new(),
                },
                503,
            ),
            (
                RelayError::Upstream {
                    status: 200,
                    body: String::new(),
                },
                502,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(relay_status(&err).as_u16(), expected, "{err}");
        }
    }

    #[test]
    fn params_default_to_no_override() {
        let params: WebhookParams = serde_json::from_str("{}").unwrap();
        assert!(params.event_type.is_none());
    }
}
