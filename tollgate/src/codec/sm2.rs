//! SM2 signature engine over the compact token layout.
//!
//! Tokens carry the literal header `{"alg":"SM2","typ":"JWT"}`. The
//! signature covers the ASCII bytes of `seg0.seg1` and is encoded as an
//! ASN.1 DER `SEQUENCE { INTEGER r, INTEGER s }`, the form other SM2
//! implementations emit. Only a private key is configured; verification uses
//! the public key derived from it.

use der::asn1::UintRef;
use der::{Decode, Encode, Sequence};
use serde::Deserialize;
use signature::{Signer, Verifier};
use sm2::SecretKey;
use sm2::dsa::{Signature, SigningKey, VerifyingKey};
use sm2::pkcs8::DecodePrivateKey;

use super::claims::{TokenClaims, apply_lifetime};
use super::keys::decode_key_material;
use super::segments::{self, CompactToken};
use super::{CodecError, Scheme};

const HEADER: &str = r#"{"alg":"SM2","typ":"JWT"}"#;

/// Default distinguishing identifier (GM/T 0009).
const DIST_ID: &str = "1234567812345678";

/// Byte length of `r` and of `s`.
const SCALAR_LEN: usize = 32;

/// Wire form of the signature.
#[derive(Sequence)]
struct DerSignature<'a> {
    r: UintRef<'a>,
    s: UintRef<'a>,
}

#[derive(Deserialize)]
struct Sm2Config {
    #[serde(default)]
    expires: i64,
    #[serde(default, alias = "sm2_key")]
    private_key: String,
}

/// SM2 signer and verifier.
pub struct Sm2Codec {
    lifetime_secs: i64,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Sm2Codec {
    /// Build from `{"expires", "private_key"}` where the key is base64
    /// PKCS#8 DER. `sm2_key` is accepted in place of `private_key`.
    ///
    /// # Errors
    /// Returns an error if the JSON is invalid or the key is missing or
    /// unparsable.
    pub fn from_config(config: &str) -> Result<Self, CodecError> {
        let config: Sm2Config =
            serde_json::from_str(config).map_err(|e| CodecError::config(Scheme::Sm2, e))?;
        if config.private_key.is_empty() {
            return Err(CodecError::key(Scheme::Sm2, "private_key is required"));
        }

        let der = decode_key_material(&config.private_key)
            .map_err(|e| CodecError::key(Scheme::Sm2, e))?;
        let secret = SecretKey::from_pkcs8_der(&der).map_err(|e| CodecError::key(Scheme::Sm2, e))?;
        let signing_key =
            SigningKey::new(DIST_ID, &secret).map_err(|e| CodecError::key(Scheme::Sm2, e))?;
        let verifying_key = signing_key.verifying_key().clone();

        Ok(Self {
            lifetime_secs: config.expires,
            signing_key,
            verifying_key,
        })
    }

    /// # Errors
    /// Returns `CodecError::Sign` if the claims cannot be encoded or the
    /// signature cannot be produced.
    pub fn sign<C: TokenClaims>(&self, mut claims: C) -> Result<String, CodecError> {
        apply_lifetime(&mut claims, self.lifetime_secs);
        let input =
            segments::signing_input(HEADER, &claims).map_err(|e| CodecError::sign(Scheme::Sm2, e))?;
        let signature: Signature = self
            .signing_key
            .try_sign(input.as_bytes())
            .map_err(|e| CodecError::sign(Scheme::Sm2, e))?;
        let der = signature_to_der(&signature).map_err(|e| CodecError::sign(Scheme::Sm2, e))?;
        Ok(segments::assemble(&input, &der))
    }

    #[must_use]
    pub fn verify<C: TokenClaims>(&self, token: &str) -> Option<C> {
        let token = CompactToken::parse(token)?;
        let signature = signature_from_der(token.signature())?;
        if let Err(e) = self
            .verifying_key
            .verify(token.signing_input().as_bytes(), &signature)
        {
            tracing::debug!("SM2 verification failed: {e}");
            return None;
        }
        token.claims()
    }
}

fn signature_to_der(signature: &Signature) -> Result<Vec<u8>, der::Error> {
    let bytes = signature.to_bytes();
    let (r, s) = bytes.split_at(SCALAR_LEN);
    DerSignature {
        r: UintRef::new(r)?,
        s: UintRef::new(s)?,
    }
    .to_der()
}

fn signature_from_der(der: &[u8]) -> Option<Signature> {
    let parsed = DerSignature::from_der(der).ok()?;
    let mut raw = [0_u8; 2 * SCALAR_LEN];
    let (r, s) = raw.split_at_mut(SCALAR_LEN);
    left_pad(parsed.r.as_bytes(), r)?;
    left_pad(parsed.s.as_bytes(), s)?;
    Signature::from_slice(&raw).ok()
}

/// Copy a big-endian integer into the tail of `out`.
fn left_pad(value: &[u8], out: &mut [u8]) -> Option<()> {
    let offset = out.len().checked_sub(value.len())?;
    out[offset..].copy_from_slice(value);
    Some(())
}
