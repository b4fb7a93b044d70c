//! Deduplication keys for alerts.
//!
//! Scanners re-send the same alert many times (every policy evaluation, every
//! pod restart). Two alerts are equivalent when they would produce the same
//! dispatch: same target repository, same event type, same image and tag.
//!
//! The key is the SHA-256 of those fields, hex-encoded. Each field is
//! length-prefixed before hashing so that no two distinct field tuples can
//! produce the same byte stream (`("ab", "c")` vs `("a", "bc")`).

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Tag used in the key when an alert does not name one.
pub const DEFAULT_TAG: &str = "latest";

/// A deduplication key identifying a logically equivalent alert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Creates the key for an alert about `image:tag` dispatched as
    /// `event_type` to `owner/repo`. A missing tag is treated as `latest`.
    pub fn for_alert(
        owner: &str,
        repo: &str,
        event_type: &str,
        image: &str,
        tag: Option<&str>,
    ) -> Self {
        let tag = tag.filter(|t| !t.is_empty()).unwrap_or(DEFAULT_TAG);

        let mut hasher = Sha256::new();
        for field in [owner, repo, event_type, image, tag] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        DedupKey(hex::encode(hasher.finalize()))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
