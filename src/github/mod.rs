//! GitHub API access.
//!
//! This module provides the `GitHubApi` trait (the four calls the relay makes)
//! and its octocrab-based implementation.
//!
//! Key features:
//! - Explicit bearer credential per call (app JWT or installation token)
//! - Fixed outbound timeout on every call
//! - Errors categorized as transient or permanent, which decides whether a
//!   failed dispatch releases its dedup key
//! - No client-side retries

mod api;
mod client;
mod error;

pub use api::{DispatchRequest, DispatchResponse, GitHubApi, InstallationToken};
pub use client::{OUTBOUND_TIMEOUT, OctocrabApi};
pub use error::{ApiError, GitHubErrorKind, classify_status};
