//! Shared test utilities: a recording fake GitHub, a manual clock and an RSA
//! test key.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use crate::auth::AppSigner;
use crate::clock::Clock;
use crate::github::{ApiError, DispatchRequest, DispatchResponse, GitHubApi, InstallationToken};
use crate::types::{AppId, InstallationId, RepoId};

/// PKCS#1 RSA private key used to sign app JWTs in tests.
pub const TEST_APP_KEY_PEM: &str = include_str!("testdata/app-key.pem");

/// SPKI public half of [`TEST_APP_KEY_PEM`].
pub const TEST_APP_PUBLIC_KEY_PEM: &str = include_str!("testdata/app-key.pub.pem");

/// Installation id the fake reports for every repository.
pub const TEST_INSTALLATION: InstallationId = InstallationId(4242);

/// A fixed instant tests start from.
pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

pub fn test_signer() -> AppSigner {
    AppSigner::new(AppId::new("12345"), TEST_APP_KEY_PEM.as_bytes()).unwrap()
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A dispatch the fake received.
#[derive(Debug, Clone)]
pub struct RecordedDispatch {
    pub token: String,
    pub repo: RepoId,
    pub request: DispatchRequest,
}

#[derive(Debug)]
struct FakeState {
    token_expiry: Option<String>,
    installation_failure: Option<ApiError>,
    exchange_failure: Option<ApiError>,
    topics: Result<Vec<String>, ApiError>,
    dispatch_failure: Option<ApiError>,
    dispatch_statuses: VecDeque<u16>,

    installation_lookups: usize,
    tokens_minted: usize,
    topic_calls: usize,
    dispatches: Vec<RecordedDispatch>,
}

/// An in-memory [`GitHubApi`] that records every call.
///
/// By default every repository belongs to [`TEST_INSTALLATION`], minted
/// tokens are distinct (`ghs_token_1`, `ghs_token_2`, ...) and valid for one
/// hour from [`test_time`], repositories have no topics, and dispatches
/// answer 204.
#[derive(Debug)]
pub struct FakeGitHub {
    state: Mutex<FakeState>,
}

impl Default for FakeGitHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                token_expiry: Some((test_time() + Duration::hours(1)).to_rfc3339()),
                installation_failure: None,
                exchange_failure: None,
                topics: Ok(Vec::new()),
                dispatch_failure: None,
                dispatch_statuses: VecDeque::new(),
                installation_lookups: 0,
                tokens_minted: 0,
                topic_calls: 0,
                dispatches: Vec::new(),
            }),
        }
    }

    /// Sets the `expires_at` string sent with minted tokens.
    pub fn set_token_expiry(&self, expiry: Option<String>) {
        self.state.lock().token_expiry = expiry;
    }

    pub fn fail_installation_lookup(&self, err: ApiError) {
        self.state.lock().installation_failure = Some(err);
    }

    pub fn fail_token_exchange(&self, err: ApiError) {
        self.state.lock().exchange_failure = Some(err);
    }

    pub fn set_topics<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().topics = Ok(topics.into_iter().map(Into::into).collect());
    }

    pub fn fail_topics(&self, err: ApiError) {
        self.state.lock().topics = Err(err);
    }

    /// Makes every dispatch fail without an HTTP answer.
    pub fn fail_dispatch(&self, err: ApiError) {
        self.state.lock().dispatch_failure = Some(err);
    }

    /// Queues statuses for upcoming dispatches. Once the queue is empty,
    /// dispatches answer 204.
    pub fn queue_dispatch_statuses(&self, statuses: impl IntoIterator<Item = u16>) {
        self.state.lock().dispatch_statuses.extend(statuses);
    }

    pub fn installation_lookups(&self) -> usize {
        self.state.lock().installation_lookups
    }

    pub fn tokens_minted(&self) -> usize {
        self.state.lock().tokens_minted
    }

    pub fn topic_calls(&self) -> usize {
        self.state.lock().topic_calls
    }

    pub fn dispatch_calls(&self) -> usize {
        self.state.lock().dispatches.len()
    }

    pub fn dispatches(&self) -> Vec<RecordedDispatch> {
        self.state.lock().dispatches.clone()
    }
}

impl GitHubApi for FakeGitHub {
    async fn repository_installation(
        &self,
        _app_jwt: &str,
        _repo: &RepoId,
    ) -> Result<InstallationId, ApiError> {
        let mut state = self.state.lock();
        state.installation_lookups += 1;
        match &state.installation_failure {
            Some(err) => Err(err.clone()),
            None => Ok(TEST_INSTALLATION),
        }
    }

    async fn create_installation_token(
        &self,
        _app_jwt: &str,
        _installation: InstallationId,
    ) -> Result<InstallationToken, ApiError> {
        let mut state = self.state.lock();
        if let Some(err) = &state.exchange_failure {
            return Err(err.clone());
        }
        state.tokens_minted += 1;
        Ok(InstallationToken {
            token: format!("ghs_token_{}", state.tokens_minted),
            expires_at: state.token_expiry.clone(),
        })
    }

    async fn repository_topics(&self, _token: &str, _repo: &RepoId) -> Result<Vec<String>, ApiError> {
        let mut state = self.state.lock();
        state.topic_calls += 1;
        state.topics.clone()
    }

    async fn repository_dispatch(
        &self,
        token: &str,
        repo: &RepoId,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse, ApiError> {
        let mut state = self.state.lock();
        if let Some(err) = &state.dispatch_failure {
            return Err(err.clone());
        }
        state.dispatches.push(RecordedDispatch {
            token: token.to_string(),
            repo: repo.clone(),
            request: request.clone(),
        });
        let status = state.dispatch_statuses.pop_front().unwrap_or(204);
        let body = if status == 204 {
            String::new()
        } else {
            format!("{{\"message\":\"status {status}\"}}")
        };
        Ok(DispatchResponse { status, body })
    }
}
