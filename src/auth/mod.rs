//! Credentials for outbound GitHub calls.
//!
//! Two credential paths exist:
//!
//! - **GitHub App** (preferred): an app JWT is exchanged for short-lived
//!   installation tokens, cached per installation by [`TokenCache`].
//! - **Static token**: a long-lived token from configuration, used as-is.
//!
//! If app credentials are configured but unusable (e.g., a malformed key),
//! the static token is used when present; otherwise every request fails with
//! a configuration error until the deployment is fixed.

pub mod signer;
pub mod token_cache;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::github::{ApiError, GitHubApi};
use crate::types::{InstallationId, RepoId};

pub use signer::{AppSigner, SignedAssertion, SignerError, decode_private_key};
pub use token_cache::{CachedToken, EXPIRY_SAFETY_MARGIN, FALLBACK_TOKEN_TTL, TokenCache};

/// Errors from the credential pipeline.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No usable credential path is configured.
    #[error("credentials not configured: {0}")]
    Configuration(String),

    /// Signing the app JWT failed.
    #[error("{0}")]
    Signing(#[source] SignerError),

    /// The installation covering the repository could not be resolved.
    #[error("failed to resolve app installation for {repo}: {source}")]
    Resolution {
        repo: RepoId,
        #[source]
        source: ApiError,
    },

    /// The installation token could not be minted.
    #[error("failed to mint token for installation {installation}: {source}")]
    TokenExchange {
        installation: InstallationId,
        #[source]
        source: ApiError,
    },
}

impl From<SignerError> for CredentialError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Configuration(msg) => CredentialError::Configuration(msg),
            other => CredentialError::Signing(other),
        }
    }
}

/// The credential path selected at startup.
pub enum Credentials {
    App(TokenCache),
    Static(String),

    /// Nothing usable is configured; the reason is reported per request.
    Unavailable(String),
}

impl Credentials {
    /// Selects the credential path from configuration.
    pub fn from_config(config: &RelayConfig, clock: Arc<dyn Clock>) -> Self {
        if let Some(app) = &config.app {
            match AppSigner::from_credentials(app) {
                Ok(signer) => return Credentials::App(TokenCache::new(signer, clock)),
                Err(e) => match &config.static_token {
                    Some(_) => warn!(error = %e, "GitHub App credentials unusable, using static token"),
                    None => {
                        error!(error = %e, "GitHub App credentials unusable and no static token set");
                        return Credentials::Unavailable(e.to_string());
                    }
                },
            }
        }

        match &config.static_token {
            Some(token) => Credentials::Static(token.clone()),
            None => Credentials::Unavailable(
                "neither GH_APP_ID/GH_APP_PRIVATE_KEY nor GH_TOKEN is set".to_string(),
            ),
        }
    }

    /// Returns a bearer token authorized for `repo`.
    pub async fn token_for<A: GitHubApi>(
        &self,
        api: &A,
        repo: &RepoId,
    ) -> Result<String, CredentialError> {
        match self {
            Credentials::App(cache) => cache.get_token(api, repo).await,
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::Unavailable(reason) => Err(CredentialError::Configuration(reason.clone())),
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, Credentials::Unavailable(_))
    }

    /// Short label for health output and logs.
    pub fn mode(&self) -> &'static str {
        match self {
            Credentials::App(_) => "github_app",
            Credentials::Static(_) => "static_token",
            Credentials::Unavailable(_) => "unavailable",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::App(cache) => f.debug_tuple("App").field(cache).finish(),
            Credentials::Static(_) => f.debug_tuple("Static").field(&"<redacted>").finish(),
            Credentials::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}
