//! SM4-CBC engine over the compact token layout.
//!
//! The third segment is `SM4-CBC(key, iv, PKCS#7(seg0.seg1))`. Verification
//! decrypts it and compares the plaintext byte for byte with the first two
//! segments.
//!
//! # Security
//! This is encrypt-and-compare with a fixed IV taken from configuration,
//! not a MAC. Anyone holding the key can mint tokens, and the scheme offers
//! none of the guarantees of HMAC. It exists for interoperability only.
//!
//! # Invariants
//! - `key` and `iv` are exactly 16 bytes.

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::Deserialize;

use super::claims::{TokenClaims, apply_lifetime};
use super::segments::{self, CompactToken};
use super::{CodecError, Scheme};

type Encryptor = cbc::Encryptor<sm4::Sm4>;
type Decryptor = cbc::Decryptor<sm4::Sm4>;

const HEADER: &str = r#"{"alg":"SM4","typ":"JWT"}"#;
const BLOCK_LEN: usize = 16;

#[derive(Deserialize)]
struct Sm4Config {
    #[serde(default)]
    expires: i64,
    #[serde(default)]
    key: String,
    #[serde(default)]
    iv: String,
}

/// SM4 "signer" and verifier.
pub struct Sm4Codec {
    lifetime_secs: i64,
    key: [u8; BLOCK_LEN],
    iv: [u8; BLOCK_LEN],
}

impl Sm4Codec {
    /// Build from `{"expires", "key", "iv"?}`.
    ///
    /// `key` must be exactly 16 bytes. An absent `iv` defaults to the key;
    /// otherwise it is right-padded with ASCII `'0'` or truncated to 16 bytes.
    ///
    /// # Errors
    /// Returns an error if the JSON is invalid or the key has the wrong length.
    pub fn from_config(config: &str) -> Result<Self, CodecError> {
        let config: Sm4Config =
            serde_json::from_str(config).map_err(|e| CodecError::config(Scheme::Sm4, e))?;

        let key: [u8; BLOCK_LEN] = config.key.as_bytes().try_into().map_err(|_| {
            CodecError::key(
                Scheme::Sm4,
                format!("key must be exactly {BLOCK_LEN} bytes, got {}", config.key.len()),
            )
        })?;
        let iv = if config.iv.is_empty() {
            key
        } else {
            normalize_iv(&config.iv)
        };

        tracing::warn!("SM4 tokens are encrypt-and-compare, not a MAC; prefer JWT_HS256");

        Ok(Self {
            lifetime_secs: config.expires,
            key,
            iv,
        })
    }

    /// # Errors
    /// Returns `CodecError::Sign` if the claims cannot be encoded.
    pub fn sign<C: TokenClaims>(&self, mut claims: C) -> Result<String, CodecError> {
        apply_lifetime(&mut claims, self.lifetime_secs);
        let input =
            segments::signing_input(HEADER, &claims).map_err(|e| CodecError::sign(Scheme::Sm4, e))?;
        let ciphertext = Encryptor::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(input.as_bytes());
        Ok(segments::assemble(&input, &ciphertext))
    }

    #[must_use]
    pub fn verify<C: TokenClaims>(&self, token: &str) -> Option<C> {
        let token = CompactToken::parse(token)?;
        let plaintext = Decryptor::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(token.signature())
            .ok()?;
        if plaintext != token.signing_input().as_bytes() {
            tracing::debug!("SM4 verification failed: signature mismatch");
            return None;
        }
        token.claims()
    }
}

fn normalize_iv(iv: &str) -> [u8; BLOCK_LEN] {
    let mut out = [b'0'; BLOCK_LEN];
    let bytes = iv.as_bytes();
    let len = bytes.len().min(BLOCK_LEN);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}
