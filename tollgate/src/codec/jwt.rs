//! Shared `jsonwebtoken` plumbing for the HS256 and RS256 engines.
//!
//! The library expects expiry in the registered `exp` claim, while the claim
//! types in this crate call it `expires`. Tokens are wrapped so `expires`
//! travels as `exp` on the wire and is moved back on decode.
//!
//! # Invariants
//! - The library never rejects a token for being expired; expiry is a
//!   caller decision made on the returned claims.
//! - Only the configured algorithm is accepted on decode.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::claims::TokenClaims;

/// Claims as they appear inside a library-backed token.
#[derive(Debug, Serialize, Deserialize)]
struct Registered<C> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
    #[serde(flatten)]
    claims: C,
}

/// Encode and sign `claims` with the given algorithm.
///
/// # Errors
/// Returns the library error when serialisation or signing fails.
pub fn encode_claims<C: TokenClaims>(
    algorithm: Algorithm,
    key: &EncodingKey,
    mut claims: C,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = claims.expires();
    claims.set_expires(None);
    encode(&Header::new(algorithm), &Registered { exp, claims }, key)
}

/// Verify a token's structure and signature and return its claims.
///
/// # Errors
/// Returns the library error on any structural, decoding or signature
/// failure.
pub fn decode_claims<C: TokenClaims>(
    token: &str,
    algorithm: Algorithm,
    key: &DecodingKey,
) -> Result<C, jsonwebtoken::errors::Error> {
    let data = decode::<Registered<C>>(token, key, &validation(algorithm))?;
    let Registered { exp, mut claims } = data.claims;
    claims.set_expires(exp);
    Ok(claims)
}

fn validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.leeway = 0;
    validation
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;
    use crate::codec::claims::{AuthorizerClaims, UpdaterClaims};

    const SECRET: &[u8] = b"jwt-helper-secret";

    fn claims_json(token: &str) -> serde_json::Value {
        let segment = token.split('.').nth(1).expect("claims segment");
        let bytes = URL_SAFE_NO_PAD.decode(segment).expect("base64");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[test]
    fn test_expires_travels_as_exp() {
        let claims = AuthorizerClaims {
            expires: Some(1_000),
            aud: Some("svc".to_string()),
            payload: None,
            ip: None,
        };
        let token = encode_claims(Algorithm::HS256, &EncodingKey::from_secret(SECRET), claims)
            .expect("encode");

        let json = claims_json(&token);
        assert_eq!(json["exp"], 1_000);
        assert!(json.get("expires").is_none());
        assert!(json.get("payload").is_none());

        let decoded: AuthorizerClaims =
            decode_claims(&token, Algorithm::HS256, &DecodingKey::from_secret(SECRET))
                .expect("decode");
        assert_eq!(decoded.expires, Some(1_000));
        assert_eq!(decoded.aud.as_deref(), Some("svc"));
    }

    #[test]
    fn test_expired_token_still_decodes() {
        let claims = UpdaterClaims {
            expires: Some(1),
            token_hash: "abc".to_string(),
            ..UpdaterClaims::default()
        };
        let token = encode_claims(Algorithm::HS256, &EncodingKey::from_secret(SECRET), claims)
            .expect("encode");

        let decoded: UpdaterClaims =
            decode_claims(&token, Algorithm::HS256, &DecodingKey::from_secret(SECRET))
                .expect("decode");
        assert_eq!(decoded.expires, Some(1));
        assert_eq!(decoded.token_hash, "abc");
    }

    #[test]
    fn test_no_exp_is_accepted() {
        let token = encode_claims(
            Algorithm::HS256,
            &EncodingKey::from_secret(SECRET),
            AuthorizerClaims::default(),
        )
        .expect("encode");

        let decoded: AuthorizerClaims =
            decode_claims(&token, Algorithm::HS256, &DecodingKey::from_secret(SECRET))
                .expect("decode");
        assert_eq!(decoded, AuthorizerClaims::default());
    }

    #[test]
    fn test_wrong_algorithm_rejected() {
        let token = encode_claims(
            Algorithm::HS384,
            &EncodingKey::from_secret(SECRET),
            AuthorizerClaims::default(),
        )
        .expect("encode");

        let result: Result<AuthorizerClaims, _> =
            decode_claims(&token, Algorithm::HS256, &DecodingKey::from_secret(SECRET));
        assert!(result.is_err());
    }
}
