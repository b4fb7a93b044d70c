//! Vulnerability Dispatch Relay - forwards container-scanner alerts to GitHub
//! `repository_dispatch` events.
//!
//! This library provides the relay pipeline (payload extraction, alert
//! deduplication, GitHub App credentials, topic policy) and the HTTP server
//! that exposes it.

pub mod auth;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod github;
pub mod payload;
pub mod relay;
pub mod server;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod test_utils;
