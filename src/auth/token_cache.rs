//! Installation token cache.
//!
//! Getting a token for a repository is a two-step exchange with GitHub:
//!
//! 1. Resolve which installation of the app covers the repository's owner
//!    (`GET /repos/{owner}/{repo}/installation`). The owner → installation
//!    binding does not change while the process runs, so it is cached for the
//!    process lifetime, first writer wins.
//! 2. Mint an installation token (`POST /app/installations/{id}/access_tokens`).
//!    Tokens are cached per installation and reused until they are within
//!    [`EXPIRY_SAFETY_MARGIN`] of expiring.
//!
//! Both steps are authenticated with a freshly signed app JWT.
//!
//! # Concurrency
//!
//! Maps are guarded by `parking_lot` mutexes that are never held across an
//! await. Two tasks may race to mint a token for the same installation; both
//! tokens are valid, and the last one stored wins.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::CredentialError;
use super::signer::AppSigner;
use crate::clock::Clock;
use crate::github::GitHubApi;
use crate::types::{InstallationId, RepoId};

/// A cached token is only reused while it has more than this left to live.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::seconds(60);

/// Lifetime assumed for a token whose `expires_at` cannot be parsed.
///
/// GitHub tokens live for an hour; eight minutes keeps the relay working
/// while bounding how long a wrongly-assumed token is reused.
pub const FALLBACK_TOKEN_TTL: Duration = Duration::minutes(8);

/// A cached installation token.
#[derive(Clone)]
pub struct CachedToken {
    token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns true if the token can still be handed out at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - EXPIRY_SAFETY_MARGIN > now
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Per-installation token cache for one GitHub App identity.
pub struct TokenCache {
    signer: AppSigner,
    clock: Arc<dyn Clock>,

    /// Lowercased owner login → installation.
    bindings: Mutex<HashMap<String, InstallationId>>,

    tokens: Mutex<HashMap<InstallationId, CachedToken>>,
}

impl TokenCache {
    pub fn new(signer: AppSigner, clock: Arc<dyn Clock>) -> Self {
        Self {
            signer,
            clock,
            bindings: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a valid installation token for `repo`, minting one if needed.
    pub async fn get_token<A: GitHubApi>(
        &self,
        api: &A,
        repo: &RepoId,
    ) -> Result<String, CredentialError> {
        let installation = self.installation_for(api, repo).await?;

        let now = self.clock.now();
        if let Some(cached) = self.cached_token(installation, now) {
            debug!(installation = %installation, "Using cached installation token");
            return Ok(cached.token);
        }

        let minted = self.mint(api, installation).await?;
        Ok(minted.token)
    }

    /// Returns the cached binding for `owner`, if resolved.
    pub fn binding(&self, owner: &str) -> Option<InstallationId> {
        self.bindings.lock().get(&owner.to_lowercase()).copied()
    }

    /// Returns the cached token for `installation` if it is still fresh.
    fn cached_token(&self, installation: InstallationId, now: DateTime<Utc>) -> Option<CachedToken> {
        self.tokens
            .lock()
            .get(&installation)
            .filter(|t| t.is_fresh(now))
            .cloned()
    }

    async fn installation_for<A: GitHubApi>(
        &self,
        api: &A,
        repo: &RepoId,
    ) -> Result<InstallationId, CredentialError> {
        if let Some(installation) = self.binding(&repo.owner) {
            return Ok(installation);
        }

        let assertion = self.signer.sign(self.clock.now())?;
        let resolved = api
            .repository_installation(assertion.token(), repo)
            .await
            .map_err(|source| CredentialError::Resolution {
                repo: repo.clone(),
                source,
            })?;

        // First writer wins: a concurrent resolution may have landed already.
        let installation = *self
            .bindings
            .lock()
            .entry(repo.owner.to_lowercase())
            .or_insert(resolved);

        info!(
            owner = %repo.owner,
            installation = %installation,
            "Resolved app installation"
        );
        Ok(installation)
    }

    async fn mint<A: GitHubApi>(
        &self,
        api: &A,
        installation: InstallationId,
    ) -> Result<CachedToken, CredentialError> {
        let now = self.clock.now();
        let assertion = self.signer.sign(now)?;
        let minted = api
            .create_installation_token(assertion.token(), installation)
            .await
            .map_err(|source| CredentialError::TokenExchange {
                installation,
                source,
            })?;

        let expires_at = parse_expiry(minted.expires_at.as_deref()).unwrap_or_else(|| {
            warn!(
                installation = %installation,
                expires_at = ?minted.expires_at,
                "Unparseable token expiry, assuming fallback lifetime"
            );
            now + FALLBACK_TOKEN_TTL
        });

        let cached = CachedToken::new(minted.token, expires_at);
        self.tokens.lock().insert(installation, cached.clone());

        debug!(
            installation = %installation,
            expires_at = %expires_at,
            "Minted installation token"
        );
        Ok(cached)
    }
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("signer", &self.signer)
            .field("bindings", &self.bindings.lock().len())
            .field("tokens", &self.tokens.lock().len())
            .finish()
    }
}

/// Parses GitHub's ISO-8601 `expires_at` into UTC.
fn parse_expiry(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::ApiError;
    use crate::test_utils::{FakeGitHub, ManualClock, test_signer, test_time};

    fn cache(clock: &Arc<ManualClock>) -> TokenCache {
        TokenCache::new(test_signer(), clock.clone())
    }

    fn repo() -> RepoId {
        RepoId::new("acme", "widget")
    }

    #[tokio::test]
    async fn reuses_token_within_validity() {
        let clock = Arc::new(ManualClock::new(test_time()));
        let api = FakeGitHub::new();
        let cache = cache(&clock);

        let first = cache.get_token(&api, &repo()).await.unwrap();
        clock.advance(Duration::minutes(30));
        let second = cache.get_token(&api, &repo()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(api.tokens_minted(), 1);
        assert_eq!(api.installation_lookups(), 1);
    }

    #[tokio::test]
    async fn refreshes_inside_safety_margin() {
        let clock = Arc::new(ManualClock::new(test_time()));
        let api = FakeGitHub::new();
        let cache = cache(&clock);

        let first = cache.get_token(&api, &repo()).await.unwrap();
        // The fake issues one-hour tokens: 59m30s later only 30s remain.
        clock.advance(Duration::minutes(59) + Duration::seconds(30));
        let second = cache.get_token(&api, &repo()).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(api.tokens_minted(), 2);
        // The binding is not resolved again.
        assert_eq!(api.installation_lookups(), 1);
    }

    #[tokio::test]
    async fn binding_is_per_owner_and_case_insensitive() {
        let clock = Arc::new(ManualClock::new(test_time()));
        let api = FakeGitHub::new();
        let cache = cache(&clock);

        cache.get_token(&api, &repo()).await.unwrap();
        cache
            .get_token(&api, &RepoId::new("ACME", "other"))
            .await
            .unwrap();

        assert_eq!(api.installation_lookups(), 1);
        assert!(cache.binding("acme").is_some());
    }

    #[tokio::test]
    async fn missing_expiry_uses_fallback_ttl() {
        let clock = Arc::new(ManualClock::new(test_time()));
        let api = FakeGitHub::new();
        api.set_token_expiry(None);
        let cache = cache(&clock);

        let first = cache.get_token(&api, &repo()).await.unwrap();
        clock.advance(Duration::minutes(6));
        assert_eq!(cache.get_token(&api, &repo()).await.unwrap(), first);

        // 8 minute fallback minus the 60s margin has passed.
        clock.advance(Duration::minutes(1) + Duration::seconds(1));
        assert_ne!(cache.get_token(&api, &repo()).await.unwrap(), first);
    }

    #[tokio::test]
    async fn malformed_expiry_uses_fallback_ttl() {
        let clock = Arc::new(ManualClock::new(test_time()));
        let api = FakeGitHub::new();
        api.set_token_expiry(Some("next tuesday".to_string()));
        let cache = cache(&clock);

        cache.get_token(&api, &repo()).await.unwrap();
        clock.advance(Duration::minutes(7) + Duration::seconds(1));
        cache.get_token(&api, &repo()).await.unwrap();

        assert_eq!(api.tokens_minted(), 2);
    }

    #[tokio::test]
    async fn resolution_failure_is_propagated() {
        let clock = Arc::new(ManualClock::new(test_time()));
        let api = FakeGitHub::new();
        api.fail_installation_lookup(ApiError::Status {
            endpoint: "GET /repos/acme/widget/installation".to_string(),
            status: 404,
            body: "Not Found".to_string(),
        });
        let cache = cache(&clock);

        let err = cache.get_token(&api, &repo()).await.unwrap_err();
        assert!(matches!(err, CredentialError::Resolution { .. }));
        assert!(cache.binding("acme").is_none());
        assert_eq!(api.tokens_minted(), 0);
    }

    #[tokio::test]
    async fn exchange_failure_is_propagated() {
        let clock = Arc::new(ManualClock::new(test_time()));
        let api = FakeGitHub::new();
        api.fail_token_exchange(ApiError::Status {
            endpoint: "POST /app/installations/1/access_tokens".to_string(),
            status: 401,
            body: "Bad credentials".to_string(),
        });
        let cache = cache(&clock);

        let err = cache.get_token(&api, &repo()).await.unwrap_err();
        assert!(matches!(err, CredentialError::TokenExchange { .. }));
        // The binding survives the failed exchange.
        assert!(cache.binding("acme").is_some());
    }

    #[tokio::test]
    async fn concurrent_requests_converge_on_one_binding() {
        let clock = Arc::new(ManualClock::new(test_time()));
        let api = Arc::new(FakeGitHub::new());
        let cache = Arc::new(cache(&clock));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let api = api.clone();
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get_token(api.as_ref(), &repo()).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.bindings.lock().len(), 1);
        assert_eq!(cache.tokens.lock().len(), 1);
    }

    #[test]
    fn parse_expiry_accepts_github_format() {
        let parsed = parse_expiry(Some("2026-10-19T12:00:00Z")).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-10-19T12:00:00+00:00");
        assert!(parse_expiry(Some("2026-10-19T14:00:00+02:00")).is_some());
        assert!(parse_expiry(Some("")).is_none());
        assert!(parse_expiry(None).is_none());
    }

    #[test]
    fn freshness_respects_margin() {
        let now = test_time();
        assert!(CachedToken::new("t", now + Duration::seconds(61)).is_fresh(now));
        assert!(!CachedToken::new("t", now + Duration::seconds(60)).is_fresh(now));
        assert!(!CachedToken::new("t", now - Duration::seconds(1)).is_fresh(now));
    }
}
