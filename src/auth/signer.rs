//! GitHub App JWT signing.
//!
//! GitHub authenticates an app (as opposed to one of its installations) with
//! a short-lived RS256 JWT carrying the app id as issuer. The JWT is only used
//! to resolve installations and mint installation tokens, so it is signed
//! fresh for every exchange and never cached.
//!
//! Claims are back-dated by 60 seconds to tolerate clock skew with GitHub and
//! expire 9 minutes after signing, inside GitHub's 10 minute limit.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppCredentials;
use crate::types::AppId;

/// How far `iat` is back-dated from the signing time.
pub const CLOCK_SKEW_ALLOWANCE: Duration = Duration::seconds(60);

/// How long after the signing time the assertion expires.
pub const ASSERTION_LIFETIME: Duration = Duration::seconds(540);

/// Errors that can occur while building an app assertion.
#[derive(Debug, Error)]
pub enum SignerError {
    /// App id or private key missing or malformed.
    #[error("app identity misconfigured: {0}")]
    Configuration(String),

    /// The signing operation itself failed.
    #[error("failed to sign app assertion: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Claims of a GitHub App JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// A signed app JWT together with its validity window.
#[derive(Clone)]
pub struct SignedAssertion {
    token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignedAssertion {
    /// The compact JWT, suitable for a `Bearer` header.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Signs app assertions with a fixed identity.
///
/// The key is parsed once at construction; signing is CPU-only.
#[derive(Clone)]
pub struct AppSigner {
    app_id: AppId,
    key: EncodingKey,
}

impl AppSigner {
    /// Creates a signer from an app id and PEM-encoded RSA private key.
    pub fn new(app_id: AppId, private_key_pem: &[u8]) -> Result<Self, SignerError> {
        if app_id.as_str().trim().is_empty() {
            return Err(SignerError::Configuration("app id is empty".to_string()));
        }
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| SignerError::Configuration(format!("invalid RSA private key: {e}")))?;
        Ok(Self { app_id, key })
    }

    /// Creates a signer from configured credentials, normalizing the key
    /// material first (see [`decode_private_key`]).
    pub fn from_credentials(credentials: &AppCredentials) -> Result<Self, SignerError> {
        let pem = decode_private_key(&credentials.private_key)?;
        Self::new(credentials.app_id.clone(), &pem)
    }

    /// Signs an assertion valid from `now - 60s` to `now + 540s`.
    pub fn sign(&self, now: DateTime<Utc>) -> Result<SignedAssertion, SignerError> {
        let issued_at = now - CLOCK_SKEW_ALLOWANCE;
        let expires_at = now + ASSERTION_LIFETIME;
        let claims = AssertionClaims {
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.app_id.as_str().to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(SignerError::Signing)?;

        Ok(SignedAssertion {
            token,
            issued_at,
            expires_at,
        })
    }
}

impl fmt::Debug for AppSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppSigner")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

/// Normalizes configured private key material into PEM bytes.
///
/// Accepted forms:
/// - a PEM document as-is
/// - a PEM document whose newlines were written as literal `\n`
///   (common when the key is pasted into a single-line env var)
/// - base64 of either of the above
pub fn decode_private_key(material: &str) -> Result<Vec<u8>, SignerError> {
    let material = material.trim();
    if material.is_empty() {
        return Err(SignerError::Configuration("private key is empty".to_string()));
    }

    if material.contains("-----BEGIN") {
        return Ok(unescape_newlines(material).into_bytes());
    }

    let compact: String = material.split_whitespace().collect();
    let decoded = BASE64.decode(compact.as_bytes()).map_err(|e| {
        SignerError::Configuration(format!("private key is neither PEM nor base64: {e}"))
    })?;
    let decoded = String::from_utf8(decoded).map_err(|_| {
        SignerError::Configuration("base64 private key does not decode to text".to_string())
    })?;
    if !decoded.contains("-----BEGIN") {
        return Err(SignerError::Configuration(
            "base64 private key does not contain a PEM document".to_string(),
        ));
    }
    Ok(unescape_newlines(decoded.trim()).into_bytes())
}

fn unescape_newlines(pem: &str) -> String {
    pem.replace("\\r\\n", "\n").replace("\\n", "\n")
}
