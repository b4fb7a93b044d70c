//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of identifiers that are all plain
//! strings or integers on the wire (e.g., passing an app id where an
//! installation id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A repository identifier (owner/repo format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        RepoId {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// The id of a GitHub App installation on an account.
///
/// This is the "delegated account" that installation tokens are scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallationId(pub u64);

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The issuer id of a GitHub App (the `iss` claim of app JWTs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub String);

impl AppId {
    pub fn new(s: impl Into<String>) -> Self {
        AppId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn repo_id_display() {
        assert_eq!(RepoId::new("acme", "widget").to_string(), "acme/widget");
    }

    proptest! {
        #[test]
        fn installation_id_serializes_as_bare_number(n: u64) {
            let json = serde_json::to_string(&InstallationId(n)).unwrap();
            prop_assert_eq!(json, n.to_string());
        }
    }
}
