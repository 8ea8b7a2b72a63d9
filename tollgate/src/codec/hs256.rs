//! HMAC-SHA256 engine backed by `jsonwebtoken`.
//!
//! # Pre-conditions
//! - The secret must be non-empty. It is used as raw bytes.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use serde::Deserialize;

use super::claims::{TokenClaims, apply_lifetime};
use super::{CodecError, Scheme, jwt};

#[derive(Deserialize)]
struct Hs256Config {
    #[serde(default)]
    expires: i64,
    #[serde(default)]
    secret: String,
}

/// HS256 signer and verifier.
pub struct Hs256Codec {
    lifetime_secs: i64,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Hs256Codec {
    /// Build from `{"expires": <secs>, "secret": "<string>"}`.
    ///
    /// # Errors
    /// Returns an error if the JSON is invalid or the secret is empty.
    pub fn from_config(config: &str) -> Result<Self, CodecError> {
        let config: Hs256Config =
            serde_json::from_str(config).map_err(|e| CodecError::config(Scheme::Hs256, e))?;
        if config.secret.is_empty() {
            return Err(CodecError::key(Scheme::Hs256, "secret must be non-empty"));
        }

        let secret = config.secret.as_bytes();
        Ok(Self {
            lifetime_secs: config.expires,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    /// # Errors
    /// Returns `CodecError::Sign` if encoding fails.
    pub fn sign<C: TokenClaims>(&self, mut claims: C) -> Result<String, CodecError> {
        apply_lifetime(&mut claims, self.lifetime_secs);
        jwt::encode_claims(Algorithm::HS256, &self.encoding, claims)
            .map_err(|e| CodecError::sign(Scheme::Hs256, e))
    }

    #[must_use]
    pub fn verify<C: TokenClaims>(&self, token: &str) -> Option<C> {
        jwt::decode_claims(token, Algorithm::HS256, &self.decoding)
            .inspect_err(|e| tracing::debug!("HS256 verification failed: {e}"))
            .ok()
    }
}
