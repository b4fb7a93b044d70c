//! Octocrab-backed implementation of [`GitHubApi`].
//!
//! One `Octocrab` is built at startup and shared by every call, so the
//! connection pool and TLS setup are reused. Each call derives a handle from
//! it carrying that call's credential (an app JWT or an installation token),
//! so no auth state is shared between requests for different accounts. Raw
//! `_get`/`_post` are used because the relay needs the status code and body
//! of every answer, not just deserialized successes.
//!
//! Octocrab's retry layer is turned off: a dispatch that failed must reach
//! GitHub at most once, and redelivery is the scanner's decision.
//!
//! Every call is bounded by the outbound timeout; expiry surfaces as
//! [`ApiError::Timeout`].

use std::future::Future;
use std::time::Duration;

use axum::http::header::{ACCEPT, CONTENT_TYPE, HeaderName};
use octocrab::Octocrab;
use octocrab::service::middleware::retry::RetryConfig;
use serde::Deserialize;
use tracing::debug;

use super::api::{DispatchRequest, DispatchResponse, GitHubApi, InstallationToken};
use super::error::ApiError;
use crate::types::{InstallationId, RepoId};

/// Upper bound on every outbound GitHub call.
pub const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

const API_VERSION_HEADER: HeaderName = HeaderName::from_static("x-github-api-version");
const GITHUB_JSON: &str = "application/vnd.github+json";

/// GitHub REST client for the relay's four endpoints.
#[derive(Debug, Clone)]
pub struct OctocrabApi {
    base: Octocrab,
    base_uri: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct InstallationBody {
    id: u64,
}

#[derive(Deserialize)]
struct TopicsBody {
    #[serde(default)]
    names: Vec<String>,
}

impl OctocrabApi {
    /// Creates a client for the API at `base_uri` (normally
    /// `https://api.github.com`), sending `api_version` in
    /// `X-GitHub-Api-Version`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        base_uri: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Result<Self, octocrab::Error> {
        let base_uri = base_uri.into().trim_end_matches('/').to_string();
        let base = Octocrab::builder()
            .add_retry_config(RetryConfig::None)
            .base_uri(base_uri.as_str())?
            .add_header(ACCEPT, GITHUB_JSON.to_string())
            .add_header(CONTENT_TYPE, "application/json".to_string())
            .add_header(API_VERSION_HEADER, api_version.into())
            .build()?;

        Ok(Self {
            base,
            base_uri,
            timeout: OUTBOUND_TIMEOUT,
        })
    }

    /// Overrides the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// A handle on the shared client that sends `token` as a bearer
    /// credential.
    fn client(&self, endpoint: &str, token: &str) -> Result<Octocrab, ApiError> {
        self.base
            .user_access_token(token.to_string())
            .map_err(|e| ApiError::transport(endpoint, e))
    }

    /// Runs `call` under the outbound timeout.
    async fn bounded<T, F>(&self, endpoint: &str, call: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout {
                endpoint: endpoint.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    async fn get_text(&self, endpoint: &str, token: &str, path: String) -> Result<(u16, String), ApiError> {
        self.bounded(endpoint, async {
            let client = self.client(endpoint, token)?;
            let response = client
                ._get(path)
                .await
                .map_err(|e| ApiError::transport(endpoint, e))?;
            let status = response.status().as_u16();
            let body = client
                .body_to_string(response)
                .await
                .map_err(|e| ApiError::transport(endpoint, e))?;
            Ok((status, body))
        })
        .await
    }

    async fn post_text<B>(
        &self,
        endpoint: &str,
        token: &str,
        path: String,
        body: Option<&B>,
    ) -> Result<(u16, String), ApiError>
    where
        B: serde::Serialize + Sync,
    {
        self.bounded(endpoint, async {
            let client = self.client(endpoint, token)?;
            let response = client
                ._post(path, body)
                .await
                .map_err(|e| ApiError::transport(endpoint, e))?;
            let status = response.status().as_u16();
            let body = client
                .body_to_string(response)
                .await
                .map_err(|e| ApiError::transport(endpoint, e))?;
            Ok((status, body))
        })
        .await
    }
}

/// Turns a non-2xx answer into [`ApiError::Status`].
fn expect_success(endpoint: &str, status: u16, body: String) -> Result<String, ApiError> {
    if (200..300).contains(&status) {
        Ok(body)
    } else {
        Err(ApiError::Status {
            endpoint: endpoint.to_string(),
            status,
            body,
        })
    }
}

impl GitHubApi for OctocrabApi {
    async fn repository_installation(
        &self,
        app_jwt: &str,
        repo: &RepoId,
    ) -> Result<InstallationId, ApiError> {
        let path = format!("/repos/{}/{}/installation", repo.owner, repo.repo);
        let endpoint = format!("GET {path}");
        debug!(repo = %repo, "Resolving app installation");

        let (status, body) = self.get_text(&endpoint, app_jwt, path).await?;
        let body = expect_success(&endpoint, status, body)?;
        let parsed: InstallationBody =
            serde_json::from_str(&body).map_err(|e| ApiError::invalid_response(&endpoint, e))?;
        Ok(InstallationId(parsed.id))
    }

    async fn create_installation_token(
        &self,
        app_jwt: &str,
        installation: InstallationId,
    ) -> Result<InstallationToken, ApiError> {
        let path = format!("/app/installations/{installation}/access_tokens");
        let endpoint = format!("POST {path}");
        debug!(installation = %installation, "Minting installation token");

        let (status, body) = self
            .post_text::<serde_json::Value>(&endpoint, app_jwt, path, None)
            .await?;
        let body = expect_success(&endpoint, status, body)?;
        serde_json::from_str(&body).map_err(|e| ApiError::invalid_response(&endpoint, e))
    }

    async fn repository_topics(&self, token: &str, repo: &RepoId) -> Result<Vec<String>, ApiError> {
        let path = format!("/repos/{}/{}/topics", repo.owner, repo.repo);
        let endpoint = format!("GET {path}");

        let (status, body) = self.get_text(&endpoint, token, path).await?;
        let body = expect_success(&endpoint, status, body)?;
        let parsed: TopicsBody =
            serde_json::from_str(&body).map_err(|e| ApiError::invalid_response(&endpoint, e))?;
        Ok(parsed.names)
    }

    async fn repository_dispatch(
        &self,
        token: &str,
        repo: &RepoId,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse, ApiError> {
        let path = format!("/repos/{}/{}/dispatches", repo.owner, repo.repo);
        let endpoint = format!("POST {path}");

        let (status, body) = self
            .post_text(&endpoint, token, path, Some(request))
            .await?;
        Ok(DispatchResponse { status, body })
    }
}
