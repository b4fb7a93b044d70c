//! The dispatch pipeline.
//!
//! [`Relay::handle`] takes one alert document through:
//!
//! 1. image extraction and repository derivation,
//! 2. the dedup check-and-set,
//! 3. credential acquisition,
//! 4. the optional topic policy,
//! 5. the `repository_dispatch` call.
//!
//! A duplicate stops at step 2 without touching GitHub.
//!
//! # Dedup key release
//!
//! Once the key is set, a failure that meant no dispatch reached GitHub, or
//! an answer GitHub classes as transient (5xx or 429), releases the key so
//! the scanner's redelivery goes through. A policy denial or any other 4xx
//! keeps the key: resending the same alert within the window would fail the
//! same way.

pub mod policy;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{CredentialError, Credentials, SignerError};
use crate::config::RelayConfig;
use crate::dedup::{DEFAULT_TAG, DedupKey, DedupStore};
use crate::github::{ApiError, DispatchRequest, GitHubApi, classify_status};
use crate::payload::{ExtractError, ExtractedImage, PayloadExtractor};
use crate::telemetry::ALERTS_TOTAL;
use crate::types::{InstallationId, RepoId};

pub use policy::{TopicMatchMode, TopicPolicy};

/// Errors from handling one alert.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The relay is missing configuration it needs for this alert.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] ExtractError),

    /// The app JWT could not be signed.
    #[error("signing failed: {0}")]
    Signing(#[source] SignerError),

    #[error("failed to resolve app installation for {repo}: {source}")]
    Resolution {
        repo: RepoId,
        #[source]
        source: ApiError,
    },

    #[error("failed to mint token for installation {installation}: {source}")]
    TokenExchange {
        installation: InstallationId,
        #[source]
        source: ApiError,
    },

    /// The repository does not carry the required topics.
    #[error("repository {repo} does not satisfy topic policy ({mode} of {required:?})")]
    PolicyDenied {
        repo: RepoId,
        mode: TopicMatchMode,
        required: Vec<String>,
    },

    /// The repository's topics could not be read, so the policy fails closed.
    #[error("topic policy check failed for {repo}: {source}")]
    PolicyCheck {
        repo: RepoId,
        #[source]
        source: ApiError,
    },

    /// No HTTP answer was obtained from GitHub.
    #[error("{0}")]
    Transport(#[source] ApiError),

    /// GitHub answered the dispatch with something other than 204.
    #[error("GitHub answered HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
}

impl RelayError {
    /// Whether the failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::Transport(e) if e.is_timeout())
    }

    /// Whether a redelivery of the same alert should be let through.
    pub fn releases_dedup_key(&self) -> bool {
        match self {
            RelayError::Upstream { status, .. } => classify_status(*status).is_retriable(),
            RelayError::PolicyDenied { .. } | RelayError::MalformedPayload(_) => false,
            RelayError::Transport(e) => e.kind().is_retriable(),
            RelayError::Configuration(_)
            | RelayError::Signing(_)
            | RelayError::Resolution { .. }
            | RelayError::TokenExchange { .. }
            | RelayError::PolicyCheck { .. } => true,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Configuration(_) => "configuration",
            RelayError::MalformedPayload(_) => "malformed_payload",
            RelayError::Signing(_) => "signing",
            RelayError::Resolution { .. } => "resolution",
            RelayError::TokenExchange { .. } => "token_exchange",
            RelayError::PolicyDenied { .. } => "policy_denied",
            RelayError::PolicyCheck { .. } => "policy_check",
            RelayError::Transport(_) => "transport",
            RelayError::Upstream { .. } => "upstream",
        }
    }
}

impl From<CredentialError> for RelayError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Configuration(msg) => RelayError::Configuration(msg),
            CredentialError::Signing(e) => RelayError::Signing(e),
            CredentialError::Resolution { source, .. } | CredentialError::TokenExchange { source, .. }
                if source.is_transport() =>
            {
                RelayError::Transport(source)
            }
            CredentialError::Resolution { repo, source } => RelayError::Resolution { repo, source },
            CredentialError::TokenExchange {
                installation,
                source,
            } => RelayError::TokenExchange {
                installation,
                source,
            },
        }
    }
}

/// The per-deployment settings the pipeline needs.
#[derive(Debug, Clone, Default)]
pub struct RelaySettings {
    /// Account that owns every target repository.
    pub owner: Option<String>,

    /// Event type used when the request does not override it.
    pub event_type: String,

    pub topics: TopicPolicy,
}

impl RelaySettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            owner: config.owner.clone(),
            event_type: config.event_type.clone(),
            topics: config.topics.clone(),
        }
    }
}

/// Result of handling one alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    /// The target repository as `owner/repo`.
    #[serde(serialize_with = "serialize_display")]
    pub repository: RepoId,

    /// True if the alert was suppressed as a duplicate.
    pub deduped: bool,
}

fn serialize_display<S: serde::Serializer>(repo: &RepoId, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(repo)
}

/// Relays alerts to `repository_dispatch` events.
pub struct Relay<A: GitHubApi> {
    settings: RelaySettings,
    api: A,
    credentials: Credentials,
    dedup: DedupStore,
    extractor: PayloadExtractor,
}

impl<A: GitHubApi> Relay<A> {
    pub fn new(settings: RelaySettings, api: A, credentials: Credentials, dedup: DedupStore) -> Self {
        Self {
            settings,
            api,
            credentials,
            dedup,
            extractor: PayloadExtractor::default(),
        }
    }

    /// Replaces the payload extractor.
    pub fn with_extractor(mut self, extractor: PayloadExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Whether the relay can dispatch at all: an owner and a credential path
    /// are configured.
    pub fn is_ready(&self) -> bool {
        self.settings.owner.is_some() && self.credentials.is_available()
    }

    /// Handles one alert document.
    ///
    /// `event_type` overrides the configured event type when non-empty.
    pub async fn handle(
        &self,
        alert: Value,
        event_type: Option<&str>,
    ) -> Result<DispatchOutcome, RelayError> {
        let found = self.extractor.extract(&alert)?;
        let repo_name = found.repository()?;
        let owner = self
            .settings
            .owner
            .as_deref()
            .ok_or_else(|| RelayError::Configuration("GH_OWNER is not set".to_string()))?;
        let repo = RepoId::new(owner, repo_name);

        let event_type = event_type
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(&self.settings.event_type);
        let tag = found.tag().unwrap_or(DEFAULT_TAG);

        let key = DedupKey::for_alert(&repo.owner, &repo.repo, event_type, &found.image, Some(tag));
        if !self.dedup.check_and_set(&key, self.dedup.ttl()).await {
            info!(
                repo = %repo,
                image = %found.image,
                dedup_key = %key,
                "Duplicate alert suppressed"
            );
            metrics::counter!(ALERTS_TOTAL, "outcome" => "deduped").increment(1);
            return Ok(DispatchOutcome {
                repository: repo,
                deduped: true,
            });
        }

        match self.deliver(&repo, event_type, &found, tag, alert).await {
            Ok(()) => {
                info!(repo = %repo, event_type, tag, "Dispatched alert");
                metrics::counter!(ALERTS_TOTAL, "outcome" => "dispatched").increment(1);
                Ok(DispatchOutcome {
                    repository: repo,
                    deduped: false,
                })
            }
            Err(e) => {
                let released = e.releases_dedup_key();
                if released {
                    self.dedup.release(&key).await;
                }
                warn!(
                    repo = %repo,
                    error = %e,
                    kind = e.kind(),
                    released,
                    "Dispatch failed"
                );
                metrics::counter!(ALERTS_TOTAL, "outcome" => e.kind()).increment(1);
                Err(e)
            }
        }
    }

    async fn deliver(
        &self,
        repo: &RepoId,
        event_type: &str,
        found: &ExtractedImage,
        tag: &str,
        alert: Value,
    ) -> Result<(), RelayError> {
        let token = self.credentials.token_for(&self.api, repo).await?;

        self.check_topics(&token, repo).await?;

        let request = DispatchRequest {
            event_type: event_type.to_string(),
            client_payload: json!({
                "alert": alert,
                "image": found.image,
                "tag": tag,
                "repository": repo.to_string(),
            }),
        };
        debug!(repo = %repo, event_type, "Sending repository_dispatch");

        let response = self
            .api
            .repository_dispatch(&token, repo, &request)
            .await
            .map_err(RelayError::Transport)?;

        if response.is_success() {
            Ok(())
        } else {
            Err(RelayError::Upstream {
                status: response.status,
                body: response.body,
            })
        }
    }

    async fn check_topics(&self, token: &str, repo: &RepoId) -> Result<(), RelayError> {
        let policy = &self.settings.topics;
        if policy.is_empty() {
            return Ok(());
        }

        let topics = self
            .api
            .repository_topics(token, repo)
            .await
            .map_err(|source| RelayError::PolicyCheck {
                repo: repo.clone(),
                source,
            })?;

        if policy.allows(&topics) {
            debug!(repo = %repo, ?topics, "Topic policy satisfied");
            Ok(())
        } else {
            Err(RelayError::PolicyDenied {
                repo: repo.clone(),
                mode: policy.mode(),
                required: policy.required().to_vec(),
            })
        }
    }
}

impl<A: GitHubApi + std::fmt::Debug> std::fmt::Debug for Relay<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("settings", &self.settings)
            .field("api", &self.api)
            .field("credentials", &self.credentials)
            .field("dedup", &self.dedup)
            .field("extractor", &self.extractor)
            .finish()
    }
}
