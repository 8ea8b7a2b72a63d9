//! Token codecs.
//!
//! A codec signs claim sets into compact three-part tokens and verifies them
//! again. Four schemes are supported, selected by name when a rule is built:
//!
//! | Scheme      | Engine          |
//! |-------------|-----------------|
//! | `JWT_HS256` | [`Hs256Codec`]  |
//! | `JWT_RS256` | [`Rs256Codec`]  |
//! | `JWT_SM2`   | [`Sm2Codec`]    |
//! | `JWT_SM4`   | [`Sm4Codec`]    |
//!
//! # Pre-conditions
//! - Scheme configuration is a JSON document specific to the scheme.
//!
//! # Post-conditions
//! - A constructed codec owns all its key material and is never mutated.
//! - `verify` returns `None` on any failure and never reports why.
//!
//! # Invariants
//! - Codecs do not check expiry. Callers inspect the returned claims.

pub mod claims;
mod hs256;
mod jwt;
mod keys;
mod rs256;
mod segments;
mod sm2;
mod sm4;

use std::fmt;
use std::str::FromStr;

pub use claims::{AuthorizerClaims, SignParams, TokenClaims, UpdaterClaims, unix_now};
pub use hs256::Hs256Codec;
pub use rs256::Rs256Codec;
pub use sm2::Sm2Codec;
pub use sm4::Sm4Codec;

/// Identifier of a signing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Hs256,
    Rs256,
    Sm2,
    Sm4,
}

impl Scheme {
    /// Canonical upper-case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hs256 => "JWT_HS256",
            Self::Rs256 => "JWT_RS256",
            Self::Sm2 => "JWT_SM2",
            Self::Sm4 => "JWT_SM4",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = CodecError;

    /// Parse a scheme identifier, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JWT_HS256" => Ok(Self::Hs256),
            "JWT_RS256" => Ok(Self::Rs256),
            "JWT_SM2" => Ok(Self::Sm2),
            "JWT_SM4" => Ok(Self::Sm4),
            _ => Err(CodecError::UnsupportedScheme(s.to_string())),
        }
    }
}

/// Error returned when building a codec or signing with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The scheme identifier is not known.
    UnsupportedScheme(String),
    /// The configuration document could not be parsed.
    InvalidConfig { scheme: Scheme, reason: String },
    /// Key material is missing or malformed.
    InvalidKey { scheme: Scheme, reason: String },
    /// The crypto library failed to produce a token.
    Sign { scheme: Scheme, reason: String },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedScheme(name) => write!(f, "unsupported scheme: '{name}'"),
            Self::InvalidConfig { scheme, reason } => {
                write!(f, "invalid {scheme} configuration: {reason}")
            }
            Self::InvalidKey { scheme, reason } => write!(f, "invalid {scheme} key: {reason}"),
            Self::Sign { scheme, reason } => write!(f, "{scheme} signing failed: {reason}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl CodecError {
    pub(crate) fn config(scheme: Scheme, reason: impl fmt::Display) -> Self {
        Self::InvalidConfig {
            scheme,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn key(scheme: Scheme, reason: impl fmt::Display) -> Self {
        Self::InvalidKey {
            scheme,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn sign(scheme: Scheme, reason: impl fmt::Display) -> Self {
        let err = Self::Sign {
            scheme,
            reason: reason.to_string(),
        };
        tracing::error!("{err}");
        err
    }
}

/// A constructed signing engine.
pub enum Codec {
    Hs256(Hs256Codec),
    Rs256(Rs256Codec),
    Sm2(Sm2Codec),
    Sm4(Sm4Codec),
}

impl Codec {
    /// Build an engine for `scheme` from its JSON configuration.
    ///
    /// # Errors
    /// Returns `CodecError::UnsupportedScheme` for an unknown identifier, and
    /// `InvalidConfig` or `InvalidKey` when the configuration is unusable.
    pub fn build(scheme: &str, config: &str) -> Result<Self, CodecError> {
        let scheme = scheme.parse::<Scheme>()?;
        let codec = match scheme {
            Scheme::Hs256 => Hs256Codec::from_config(config).map(Self::Hs256),
            Scheme::Rs256 => Rs256Codec::from_config(config).map(Self::Rs256),
            Scheme::Sm2 => Sm2Codec::from_config(config).map(Self::Sm2),
            Scheme::Sm4 => Sm4Codec::from_config(config).map(Self::Sm4),
        };
        if let Err(e) = &codec {
            tracing::warn!("Failed to build codec: {e}");
        }
        codec
    }

    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        match self {
            Self::Hs256(_) => Scheme::Hs256,
            Self::Rs256(_) => Scheme::Rs256,
            Self::Sm2(_) => Scheme::Sm2,
            Self::Sm4(_) => Scheme::Sm4,
        }
    }

    /// Sign `claims`, stamping the configured expiry.
    ///
    /// # Errors
    /// Returns `CodecError::Sign` when the crypto library fails.
    pub fn sign<C: TokenClaims>(&self, claims: C) -> Result<String, CodecError> {
        match self {
            Self::Hs256(codec) => codec.sign(claims),
            Self::Rs256(codec) => codec.sign(claims),
            Self::Sm2(codec) => codec.sign(claims),
            Self::Sm4(codec) => codec.sign(claims),
        }
    }

    /// Verify `token` and return its claims. Expiry is not checked.
    #[must_use]
    pub fn verify<C: TokenClaims>(&self, token: &str) -> Option<C> {
        match self {
            Self::Hs256(codec) => codec.verify(token),
            Self::Rs256(codec) => codec.verify(token),
            Self::Sm2(codec) => codec.verify(token),
            Self::Sm4(codec) => codec.verify(token),
        }
    }
}

// Key material stays out of logs.
impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Codec").field(&self.scheme()).finish()
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;

    #[test]
    fn test_scheme_parse_ignores_case() {
        assert_eq!("jwt_hs256".parse::<Scheme>(), Ok(Scheme::Hs256));
        assert_eq!("Jwt_Rs256".parse::<Scheme>(), Ok(Scheme::Rs256));
        assert_eq!("JWT_SM2".parse::<Scheme>(), Ok(Scheme::Sm2));
        assert_eq!("jwt_sm4".parse::<Scheme>(), Ok(Scheme::Sm4));
    }

    #[test]
    fn test_scheme_display_is_canonical() {
        let scheme: Scheme = "jwt_sm4".parse().expect("scheme");
        assert_eq!(scheme.to_string(), "JWT_SM4");
    }

    #[test]
    fn test_build_unknown_scheme() {
        let result = Codec::build("JWT_ES256", "{}");
        assert!(matches!(result, Err(CodecError::UnsupportedScheme(name)) if name == "JWT_ES256"));
    }

    #[test]
    fn test_build_dispatches_on_scheme() {
        let codec = Codec::build("jwt_hs256", r#"{"expires":60,"secret":"s"}"#).expect("hs256");
        assert_eq!(codec.scheme(), Scheme::Hs256);

        let codec = Codec::build("jwt_sm4", r#"{"key":"0123456789abcdef"}"#).expect("sm4");
        assert_eq!(codec.scheme(), Scheme::Sm4);
    }

    #[test]
    fn test_debug_hides_key_material() {
        let codec =
            Codec::build("JWT_HS256", r#"{"secret":"do-not-print-me"}"#).expect("hs256");
        let debug = format!("{codec:?}");
        assert!(!debug.contains("do-not-print-me"));
        assert!(debug.contains("Hs256"));
    }

    #[test]
    fn test_sign_verify_through_enum() {
        let codec = Codec::build("JWT_HS256", r#"{"expires":60,"secret":"s"}"#).expect("hs256");
        let claims = SignParams {
            payload: Some("user-1".to_string()),
            ..SignParams::default()
        }
        .into_claims();
        let token = codec.sign(claims).expect("sign");

        let verified: AuthorizerClaims = codec.verify(&token).expect("verify");
        assert_eq!(verified.payload.as_deref(), Some("user-1"));
        assert!(verified.expires.is_some());
    }

    fn every_scheme() -> Vec<Codec> {
        let configs = [
            ("JWT_HS256", serde_json::json!({"expires": 60, "secret": "bit-secret"})),
            (
                "JWT_RS256",
                serde_json::json!({
                    "expires": 60,
                    "private_key": super::rs256::tests::PRIVATE_KEY,
                    "public_key": super::rs256::tests::PUBLIC_KEY,
                }),
            ),
            (
                "JWT_SM2",
                serde_json::json!({"expires": 60, "private_key": super::sm2::tests::private_key(0x42)}),
            ),
            ("JWT_SM4", serde_json::json!({"expires": 60, "key": "0123456789abcdef"})),
        ];
        configs
            .iter()
            .map(|(scheme, config)| Codec::build(scheme, &config.to_string()).expect(scheme))
            .collect()
    }

    /// Flip one bit of the decoded `segment` at `byte` and re-encode.
    fn flip_bit(token: &str, segment: usize, byte: usize) -> String {
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut bytes = URL_SAFE_NO_PAD
            .decode(&parts[segment])
            .expect("segment is base64url");
        bytes[byte] ^= 1_u8 << (byte % 8);
        parts[segment] = URL_SAFE_NO_PAD.encode(bytes);
        parts.join(".")
    }

    #[test]
    fn test_single_bit_flip_rejected_in_every_segment() {
        let claims = AuthorizerClaims {
            payload: Some("user-1".to_string()),
            aud: Some("api".to_string()),
            ..AuthorizerClaims::default()
        };
        for codec in every_scheme() {
            let scheme = codec.scheme();
            let token = codec.sign(claims.clone()).expect("sign");
            assert!(
                codec.verify::<AuthorizerClaims>(&token).is_some(),
                "{scheme}: untouched token must verify"
            );

            for (segment, name) in ["header", "claims", "signature"].iter().enumerate() {
                let encoded = token.split('.').nth(segment).expect("three segments");
                let len = URL_SAFE_NO_PAD.decode(encoded).expect("base64url").len();
                assert!(len > 0, "{scheme}: empty {name}");
                for byte in 0..len {
                    let tampered = flip_bit(&token, segment, byte);
                    assert!(
                        codec.verify::<AuthorizerClaims>(&tampered).is_none(),
                        "{scheme}: flipped bit in {name} byte {byte} still verified"
                    );
                }
            }
        }
    }

    #[test]
    fn test_codec_error_display() {
        assert_eq!(
            CodecError::UnsupportedScheme("X".to_string()).to_string(),
            "unsupported scheme: 'X'"
        );
        assert_eq!(
            CodecError::config(Scheme::Sm4, "bad json").to_string(),
            "invalid JWT_SM4 configuration: bad json"
        );
        assert_eq!(
            CodecError::key(Scheme::Rs256, "missing").to_string(),
            "invalid JWT_RS256 key: missing"
        );
    }
}
