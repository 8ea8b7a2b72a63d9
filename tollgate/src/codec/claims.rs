//! Claim sets carried inside issued tokens.
//!
//! Two claim sets exist: `AuthorizerClaims` for access tokens and
//! `UpdaterClaims` for refresh tokens. Every optional field uses omit-empty
//! serialisation, so an absent value never reaches the wire.
//!
//! # Invariants
//! - `expires`, when present, is an absolute unix timestamp in seconds.
//! - An absent `expires` means the token never expires.
//! - Field declaration order is the wire order of the hand-rolled schemes.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Behaviour shared by every claim set an engine can sign.
pub trait TokenClaims: Serialize + DeserializeOwned {
    /// Absolute expiry in unix seconds, if any.
    fn expires(&self) -> Option<i64>;

    /// Replace the expiry claim.
    fn set_expires(&mut self, expires: Option<i64>);

    /// Whether the claims are expired at `now` (unix seconds).
    ///
    /// A token is expired when `expires <= now`. Claims without an expiry
    /// never expire.
    fn is_expired_at(&self, now: i64) -> bool {
        self.expires().is_some_and(|expires| expires <= now)
    }
}

/// Claims of an access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Opaque caller data, echoed back verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl TokenClaims for AuthorizerClaims {
    fn expires(&self) -> Option<i64> {
        self.expires
    }

    fn set_expires(&mut self, expires: Option<i64>) {
        self.expires = expires;
    }
}

/// Claims of a refresh token.
///
/// `token_hash` binds the refresh token to the access token it was issued
/// alongside (lowercase hex SHA-256 of the access token string).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_hash: String,
}

impl TokenClaims for UpdaterClaims {
    fn expires(&self) -> Option<i64> {
        self.expires
    }

    fn set_expires(&mut self, expires: Option<i64>) {
        self.expires = expires;
    }
}

/// Caller-supplied values for a new access token.
///
/// Empty strings are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SignParams {
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

impl SignParams {
    /// Build the access token claims, dropping empty values.
    ///
    /// # Post-conditions
    /// - `expires` is unset; the engine decides it from its configuration.
    #[must_use]
    pub fn into_claims(self) -> AuthorizerClaims {
        AuthorizerClaims {
            expires: None,
            aud: non_empty(self.aud),
            payload: non_empty(self.payload),
            ip: non_empty(self.ip),
        }
    }
}

impl From<&AuthorizerClaims> for SignParams {
    fn from(claims: &AuthorizerClaims) -> Self {
        Self {
            payload: claims.payload.clone(),
            aud: claims.aud.clone(),
            ip: claims.ip.clone(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Current time as unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Stamp `claims` with an expiry `lifetime_secs` from now.
///
/// Only a positive lifetime sets the claim; otherwise it is left as is.
pub fn apply_lifetime<C: TokenClaims>(claims: &mut C, lifetime_secs: i64) {
    if lifetime_secs > 0 {
        claims.set_expires(Some(unix_now().saturating_add(lifetime_secs)));
    }
}
