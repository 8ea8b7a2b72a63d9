//! Compact three-segment token layout used by the hand-rolled schemes.
//!
//! A token is `b64url(header) "." b64url(claims) "." b64url(signature)`
//! without padding. The signed message is always the first two segments
//! joined by a dot, exactly as they appear on the wire.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode the signing input `b64url(header).b64url(claims)`.
///
/// # Errors
/// Returns an error if the claims cannot be serialised.
pub fn signing_input<C: Serialize>(header: &str, claims: &C) -> Result<String, serde_json::Error> {
    let claims = serde_json::to_vec(claims)?;
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.as_bytes()),
        URL_SAFE_NO_PAD.encode(claims)
    ))
}

/// Append the signature segment to a signing input.
#[must_use]
pub fn assemble(signing_input: &str, signature: &[u8]) -> String {
    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature))
}

/// A structurally valid compact token, split into its parts.
#[derive(Debug)]
pub struct CompactToken<'a> {
    signing_input: &'a str,
    claims: Vec<u8>,
    signature: Vec<u8>,
}

impl<'a> CompactToken<'a> {
    /// Split and decode a token.
    ///
    /// Returns `None` unless there are exactly three segments and each of
    /// them is valid unpadded base64url.
    #[must_use]
    pub fn parse(token: &'a str) -> Option<Self> {
        let mut parts = token.split('.');
        let (header, claims, signature) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        URL_SAFE_NO_PAD.decode(header).ok()?;
        let claims_bytes = URL_SAFE_NO_PAD.decode(claims).ok()?;
        let signature_bytes = URL_SAFE_NO_PAD.decode(signature).ok()?;

        // header and claims are ASCII, so this split point is a char boundary
        let signing_input = &token[..header.len() + 1 + claims.len()];

        Some(Self {
            signing_input,
            claims: claims_bytes,
            signature: signature_bytes,
        })
    }

    /// The signed message: the first two segments as transmitted.
    #[must_use]
    pub const fn signing_input(&self) -> &'a str {
        self.signing_input
    }

    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Decode the claims segment. Call only after the signature checked out.
    #[must_use]
    pub fn claims<C: DeserializeOwned>(&self) -> Option<C> {
        serde_json::from_slice(&self.claims).ok()
    }
}
