//! The GitHub operations the relay needs, as a trait.
//!
//! The relay talks to four endpoints:
//!
//! | Operation | Endpoint | Auth |
//! |---|---|---|
//! | installation lookup | `GET /repos/{owner}/{repo}/installation` | app JWT |
//! | token exchange | `POST /app/installations/{id}/access_tokens` | app JWT |
//! | topic listing | `GET /repos/{owner}/{repo}/topics` | installation or static token |
//! | dispatch | `POST /repos/{owner}/{repo}/dispatches` | installation or static token |
//!
//! The production implementation is [`OctocrabApi`](super::OctocrabApi);
//! tests use a recording fake.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::types::{InstallationId, RepoId};

/// A freshly minted installation token as returned by GitHub.
#[derive(Clone, Deserialize)]
pub struct InstallationToken {
    pub token: String,

    /// ISO-8601 expiry, as sent by GitHub. Parsed by the token cache, which
    /// tolerates it being missing or malformed.
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Body of a `repository_dispatch` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchRequest {
    pub event_type: String,
    pub client_payload: serde_json::Value,
}

/// Raw answer to a dispatch call. Any HTTP status is returned here; the
/// caller decides what a failure means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: String,
}

impl DispatchResponse {
    /// GitHub answers a successful dispatch with 204 No Content.
    pub fn is_success(&self) -> bool {
        self.status == 204
    }
}

/// GitHub API operations used by the relay.
///
/// Every operation takes the bearer credential explicitly; implementations
/// hold no authentication state.
pub trait GitHubApi: Send + Sync + 'static {
    /// Looks up the app installation that covers `repo`.
    fn repository_installation(
        &self,
        app_jwt: &str,
        repo: &RepoId,
    ) -> impl Future<Output = Result<InstallationId, ApiError>> + Send;

    /// Mints an installation access token.
    fn create_installation_token(
        &self,
        app_jwt: &str,
        installation: InstallationId,
    ) -> impl Future<Output = Result<InstallationToken, ApiError>> + Send;

    /// Lists the repository's topics.
    fn repository_topics(
        &self,
        token: &str,
        repo: &RepoId,
    ) -> impl Future<Output = Result<Vec<String>, ApiError>> + Send;

    /// Sends a `repository_dispatch` event.
    ///
    /// Returns `Err` only when no HTTP answer was obtained.
    fn repository_dispatch(
        &self,
        token: &str,
        repo: &RepoId,
        request: &DispatchRequest,
    ) -> impl Future<Output = Result<DispatchResponse, ApiError>> + Send;
}
