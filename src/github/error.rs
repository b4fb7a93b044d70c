//! GitHub API error types.
//!
//! Errors are split the same way the relay decides what to do with them:
//!
//! - **Transport** failures (timeouts, connection errors) never reached GitHub
//!   or never got an answer. The webhook sender may retry.
//! - **Status** failures carry the HTTP status GitHub answered with. 5xx and
//!   429 are transient; other 4xx are permanent.
//! - **InvalidResponse** means GitHub answered 2xx with a body we could not
//!   interpret, which retrying will not fix.

use std::time::Duration;

use thiserror::Error;

/// The kind of GitHub API error: whether a later redelivery of the same
/// request can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// Safe to retry later (server errors, rate limits, timeouts).
    Transient,

    /// Retrying the identical request will fail again.
    Permanent,
}

impl GitHubErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A failed call against the GitHub API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The call did not complete within the outbound timeout.
    #[error("{endpoint} timed out after {}s", .timeout.as_secs())]
    Timeout {
        endpoint: String,
        timeout: Duration,
    },

    /// The call failed below HTTP (DNS, connect, TLS, body read).
    #[error("{endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    /// GitHub answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// GitHub answered 2xx but the body was not what we expected.
    #[error("unexpected response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

impl ApiError {
    pub fn transport(endpoint: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ApiError::Transport {
            endpoint: endpoint.into(),
            message: err.to_string(),
        }
    }

    pub fn invalid_response(endpoint: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ApiError::InvalidResponse {
            endpoint: endpoint.into(),
            message: err.to_string(),
        }
    }

    /// Returns the HTTP status, if GitHub answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the request never got an HTTP answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Timeout { .. } | ApiError::Transport { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }

    pub fn kind(&self) -> GitHubErrorKind {
        match self {
            ApiError::Timeout { .. } | ApiError::Transport { .. } => GitHubErrorKind::Transient,
            ApiError::Status { status, .. } => classify_status(*status),
            ApiError::InvalidResponse { .. } => GitHubErrorKind::Permanent,
        }
    }
}

/// Classifies an HTTP status GitHub answered with.
pub fn classify_status(status: u16) -> GitHubErrorKind {
    match status {
        429 => GitHubErrorKind::Transient,
        code if (500..600).contains(&code) => GitHubErrorKind::Transient,
        _ => GitHubErrorKind::Permanent,
    }
}
