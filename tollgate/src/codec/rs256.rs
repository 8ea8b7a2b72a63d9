//! RSASSA-PKCS1-v1_5 SHA-256 engine backed by `jsonwebtoken`.
//!
//! # Pre-conditions
//! - `private_key` is base64 DER, PKCS#1 or PKCS#8.
//! - `public_key` is base64 DER, SPKI or PKCS#1, and belongs to the private key.
//!
//! # Post-conditions
//! - Both keys are re-encoded as PKCS#1 DER for the signing library.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;

use super::claims::{TokenClaims, apply_lifetime};
use super::keys::decode_key_material;
use super::{CodecError, Scheme, jwt};

#[derive(Deserialize)]
struct Rs256Config {
    #[serde(default)]
    expires: i64,
    #[serde(default)]
    public_key: String,
    #[serde(default)]
    private_key: String,
}

/// RS256 signer and verifier.
pub struct Rs256Codec {
    lifetime_secs: i64,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Rs256Codec {
    /// Build from `{"expires", "public_key", "private_key"}`.
    ///
    /// # Errors
    /// Returns an error if the JSON is invalid, either key is missing or
    /// unparsable, or the keys do not form a pair.
    pub fn from_config(config: &str) -> Result<Self, CodecError> {
        let config: Rs256Config =
            serde_json::from_str(config).map_err(|e| CodecError::config(Scheme::Rs256, e))?;
        if config.private_key.is_empty() {
            return Err(CodecError::key(Scheme::Rs256, "private_key is required"));
        }
        if config.public_key.is_empty() {
            return Err(CodecError::key(Scheme::Rs256, "public_key is required"));
        }

        let private = parse_private_key(&config.private_key)?;
        let public = parse_public_key(&config.public_key)?;
        if RsaPublicKey::from(&private) != public {
            return Err(CodecError::key(
                Scheme::Rs256,
                "public_key does not match private_key",
            ));
        }

        let private_der = private
            .to_pkcs1_der()
            .map_err(|e| CodecError::key(Scheme::Rs256, e))?;
        let public_der = public
            .to_pkcs1_der()
            .map_err(|e| CodecError::key(Scheme::Rs256, e))?;

        Ok(Self {
            lifetime_secs: config.expires,
            encoding: EncodingKey::from_rsa_der(private_der.as_bytes()),
            decoding: DecodingKey::from_rsa_der(public_der.as_bytes()),
        })
    }

    /// # Errors
    /// Returns `CodecError::Sign` if signing fails.
    pub fn sign<C: TokenClaims>(&self, mut claims: C) -> Result<String, CodecError> {
        apply_lifetime(&mut claims, self.lifetime_secs);
        jwt::encode_claims(Algorithm::RS256, &self.encoding, claims)
            .map_err(|e| CodecError::sign(Scheme::Rs256, e))
    }

    #[must_use]
    pub fn verify<C: TokenClaims>(&self, token: &str) -> Option<C> {
        jwt::decode_claims(token, Algorithm::RS256, &self.decoding)
            .inspect_err(|e| tracing::debug!("RS256 verification failed: {e}"))
            .ok()
    }
}

fn parse_private_key(encoded: &str) -> Result<RsaPrivateKey, CodecError> {
    let der = decode_key_material(encoded)
        .map_err(|e| CodecError::key(Scheme::Rs256, format!("private_key: {e}")))?;
    RsaPrivateKey::from_pkcs1_der(&der)
        .or_else(|_| RsaPrivateKey::from_pkcs8_der(&der))
        .map_err(|e| CodecError::key(Scheme::Rs256, format!("private_key: {e}")))
}

fn parse_public_key(encoded: &str) -> Result<RsaPublicKey, CodecError> {
    let der = decode_key_material(encoded)
        .map_err(|e| CodecError::key(Scheme::Rs256, format!("public_key: {e}")))?;
    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| CodecError::key(Scheme::Rs256, format!("public_key: {e}")))
}
