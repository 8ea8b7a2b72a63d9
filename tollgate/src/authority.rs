//! Token issuing, verification and refresh.
//!
//! # Pre-conditions
//! - Rules are looked up by name in the shared registry on every call.
//!
//! # Post-conditions
//! - `sign` returns a refresh token exactly when the rule has an updater.
//! - A refresh token's `token_hash` is the lowercase hex SHA-256 of the
//!   access token it was issued with.
//!
//! # Invariants
//! - Verification failures never carry detail beyond valid or invalid.
//! - Refresh accepts an expired access token, but never an expired refresh
//!   token.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::codec::{
    AuthorizerClaims, CodecError, SignParams, TokenClaims, UpdaterClaims, unix_now,
};
use crate::registry::{RegistryError, RuleRegistry};
use crate::rule::Rule;

/// Tokens handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedTokens {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Errors from the authorization protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No rule with this name is registered.
    RuleNotFound(String),
    /// The access token is not authentic.
    InvalidToken,
    /// The refresh token is not authentic, is expired, or is bound to a
    /// different access token.
    InvalidRefreshToken,
    /// The rule has no updater, so it never issues refresh tokens.
    RefreshUnsupported(String),
    /// A codec failed to sign.
    Sign(CodecError),
    Registry(RegistryError),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuleNotFound(name) => write!(f, "rule not found: {name}"),
            Self::InvalidToken => write!(f, "invalid token"),
            Self::InvalidRefreshToken => write!(f, "invalid refresh_token"),
            Self::RefreshUnsupported(name) => {
                write!(f, "rule '{name}' does not issue refresh tokens")
            }
            Self::Sign(e) => write!(f, "failed to issue token: {e}"),
            Self::Registry(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sign(e) => Some(e),
            Self::Registry(e) => Some(e),
            Self::RuleNotFound(_)
            | Self::InvalidToken
            | Self::InvalidRefreshToken
            | Self::RefreshUnsupported(_) => None,
        }
    }
}

impl From<RegistryError> for AuthError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

/// Lowercase hex SHA-256 of an access token.
#[must_use]
pub fn token_hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Runs sign, verify and refresh against the registry.
pub struct Authority {
    registry: Arc<RuleRegistry>,
    /// Require a refresh token to be bound to the presented access token.
    strict_refresh_binding: bool,
}

impl Authority {
    #[must_use]
    pub const fn new(registry: Arc<RuleRegistry>, strict_refresh_binding: bool) -> Self {
        Self {
            registry,
            strict_refresh_binding,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// Whether refresh tokens are checked against the access token they renew.
    #[must_use]
    pub const fn strict_refresh_binding(&self) -> bool {
        self.strict_refresh_binding
    }

    /// Issue an access token, plus a refresh token if the rule has an updater.
    ///
    /// # Errors
    /// Returns `RuleNotFound` for an unknown rule and `Sign` if a codec fails.
    pub fn sign(&self, name: &str, params: SignParams) -> Result<IssuedTokens, AuthError> {
        let rule = self.rule(name)?;
        let tokens = issue(&rule, params.into_claims())?;
        tracing::debug!(
            "Issued token for rule '{name}' (refresh: {})",
            tokens.refresh_token.is_some()
        );
        Ok(tokens)
    }

    /// Whether `token` is authentic and unexpired under the rule.
    ///
    /// # Errors
    /// Returns `RuleNotFound` for an unknown rule.
    pub fn verify(&self, name: &str, token: &str) -> Result<bool, AuthError> {
        Ok(self.inspect(name, token)?.is_some())
    }

    /// Claims of `token` if it is authentic and unexpired under the rule.
    ///
    /// # Errors
    /// Returns `RuleNotFound` for an unknown rule.
    pub fn inspect(&self, name: &str, token: &str) -> Result<Option<AuthorizerClaims>, AuthError> {
        let rule = self.rule(name)?;
        Ok(rule
            .authorizer()
            .verify::<AuthorizerClaims>(token)
            .filter(|claims| !claims.is_expired_at(unix_now())))
    }

    /// Exchange an access token and its refresh token for a new pair.
    ///
    /// The access token only needs to be authentic; it may be expired. The
    /// new access token carries the original `payload`, `aud` and `ip`.
    ///
    /// # Errors
    /// - `RuleNotFound` for an unknown rule.
    /// - `RefreshUnsupported` if the rule has no updater.
    /// - `InvalidToken` if the access token is not authentic.
    /// - `InvalidRefreshToken` if the refresh token is not authentic, is
    ///   expired, or (with strict binding) belongs to another access token.
    /// - `Sign` if a codec fails.
    pub fn refresh(
        &self,
        name: &str,
        token: &str,
        refresh_token: &str,
    ) -> Result<IssuedTokens, AuthError> {
        let rule = self.rule(name)?;
        let Some(updater) = rule.updater() else {
            return Err(AuthError::RefreshUnsupported(name.to_string()));
        };

        let access = rule
            .authorizer()
            .verify::<AuthorizerClaims>(token)
            .ok_or(AuthError::InvalidToken)?;

        let refresh = updater
            .verify::<UpdaterClaims>(refresh_token)
            .ok_or(AuthError::InvalidRefreshToken)?;
        if refresh.is_expired_at(unix_now()) {
            return Err(AuthError::InvalidRefreshToken);
        }
        if self.strict_refresh_binding && refresh.token_hash != token_hash(token) {
            tracing::warn!("Refresh token for rule '{name}' is bound to another access token");
            return Err(AuthError::InvalidRefreshToken);
        }

        let tokens = issue(&rule, SignParams::from(&access).into_claims())?;
        tracing::debug!("Refreshed token for rule '{name}'");
        Ok(tokens)
    }

    fn rule(&self, name: &str) -> Result<Arc<Rule>, AuthError> {
        self.registry
            .get(name)?
            .ok_or_else(|| AuthError::RuleNotFound(name.to_string()))
    }
}

fn issue(rule: &Rule, claims: AuthorizerClaims) -> Result<IssuedTokens, AuthError> {
    let refresh_claims = UpdaterClaims {
        expires: None,
        aud: claims.aud.clone(),
        ip: claims.ip.clone(),
        token_hash: String::new(),
    };

    let token = rule.authorizer().sign(claims).map_err(AuthError::Sign)?;
    let refresh_token = match rule.updater() {
        Some(updater) => Some(
            updater
                .sign(UpdaterClaims {
                    token_hash: token_hash(&token),
                    ..refresh_claims
                })
                .map_err(AuthError::Sign)?,
        ),
        None => None,
    };

    Ok(IssuedTokens {
        token,
        refresh_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::rule::tests::hs256_definition;
    use crate::rule::{CodecSpec, RuleDefinition};

    fn authority(strict: bool, definitions: Vec<RuleDefinition>) -> Authority {
        let registry = Arc::new(RuleRegistry::new());
        for definition in definitions {
            registry
                .put(Rule::build(definition).expect("rule"))
                .expect("put");
        }
        Authority::new(registry, strict)
    }

    fn params(payload: &str) -> SignParams {
        SignParams {
            payload: Some(payload.to_string()),
            aud: Some("api".to_string()),
            ip: Some("10.1.2.3".to_string()),
        }
    }

    fn sm4_definition(name: &str) -> RuleDefinition {
        RuleDefinition {
            name: name.to_string(),
            authorizer: CodecSpec::new("JWT_SM4", r#"{"expires":60,"key":"aaaaaaaaaaaaaaaa"}"#),
            updater: CodecSpec::new("JWT_SM4", r#"{"expires":600,"key":"bbbbbbbbbbbbbbbb"}"#),
        }
    }

    /// An access token for `hs256_definition` that expired ten seconds ago.
    fn expired_token() -> String {
        let codec = Codec::build("JWT_HS256", r#"{"secret":"access"}"#).expect("codec");
        codec
            .sign(AuthorizerClaims {
                expires: Some(unix_now() - 10),
                payload: Some("old".to_string()),
                aud: Some("api".to_string()),
                ip: None,
            })
            .expect("sign")
    }

    /// A refresh token for `hs256_definition` bound to `token`.
    fn refresh_token_for(token: &str, expires: Option<i64>) -> String {
        let codec = Codec::build("JWT_HS256", r#"{"secret":"refresh"}"#).expect("codec");
        codec
            .sign(UpdaterClaims {
                expires,
                token_hash: token_hash(token),
                ..UpdaterClaims::default()
            })
            .expect("sign")
    }

    #[test]
    fn test_token_hash_is_lowercase_hex_sha256() {
        assert_eq!(
            token_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sign_with_updater() {
        let authority = authority(true, vec![hs256_definition("r")]);
        let tokens = authority.sign("r", params("u1")).expect("sign");
        let refresh_token = tokens.refresh_token.expect("refresh token");

        let rule = authority.registry().get("r").expect("get").expect("rule");
        let refresh: UpdaterClaims = rule
            .updater()
            .expect("updater")
            .verify(&refresh_token)
            .expect("authentic");
        assert_eq!(refresh.token_hash, token_hash(&tokens.token));
        assert_eq!(refresh.aud.as_deref(), Some("api"));
    }

    #[test]
    fn test_sign_without_updater() {
        let definition = RuleDefinition {
            updater: CodecSpec::default(),
            ..hs256_definition("r")
        };
        let authority = authority(true, vec![definition]);
        let tokens = authority.sign("r", params("u1")).expect("sign");
        assert!(tokens.refresh_token.is_none());
        assert_eq!(
            serde_json::to_value(&tokens).expect("json"),
            serde_json::json!({"token": tokens.token})
        );
    }

    #[test]
    fn test_unknown_rule() {
        let authority = authority(true, vec![]);
        assert_eq!(
            authority.sign("missing", SignParams::default()),
            Err(AuthError::RuleNotFound("missing".to_string()))
        );
        assert_eq!(
            authority.verify("missing", "t"),
            Err(AuthError::RuleNotFound("missing".to_string()))
        );
        assert_eq!(
            authority.refresh("missing", "t", "r"),
            Err(AuthError::RuleNotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_verify_and_inspect() {
        let authority = authority(true, vec![hs256_definition("r"), sm4_definition("s")]);
        for name in ["r", "s"] {
            let tokens = authority.sign(name, params("u1")).expect("sign");
            assert!(authority.verify(name, &tokens.token).expect("verify"));
            assert!(!authority.verify(name, "garbage").expect("verify"));

            let claims = authority
                .inspect(name, &tokens.token)
                .expect("inspect")
                .expect("valid");
            assert_eq!(claims.payload.as_deref(), Some("u1"));
            assert_eq!(claims.ip.as_deref(), Some("10.1.2.3"));
        }
    }

    #[test]
    fn test_verify_rejects_expired() {
        let authority = authority(true, vec![hs256_definition("r")]);
        assert!(!authority.verify("r", &expired_token()).expect("verify"));
    }

    #[test]
    fn test_verify_rejects_token_of_other_rule() {
        let authority = authority(true, vec![hs256_definition("r"), sm4_definition("s")]);
        let tokens = authority.sign("s", params("u1")).expect("sign");
        assert!(!authority.verify("r", &tokens.token).expect("verify"));
    }

    #[test]
    fn test_refresh_roundtrip() {
        let authority = authority(true, vec![hs256_definition("r"), sm4_definition("s")]);
        for name in ["r", "s"] {
            let tokens = authority.sign(name, params("u1")).expect("sign");
            let refresh_token = tokens.refresh_token.expect("refresh token");

            let renewed = authority
                .refresh(name, &tokens.token, &refresh_token)
                .expect("refresh");
            let claims = authority
                .inspect(name, &renewed.token)
                .expect("inspect")
                .expect("valid");
            assert_eq!(claims.payload.as_deref(), Some("u1"));
            assert_eq!(claims.aud.as_deref(), Some("api"));
            assert_eq!(claims.ip.as_deref(), Some("10.1.2.3"));
            assert!(renewed.refresh_token.is_some());
        }
    }

    #[test]
    fn test_refresh_accepts_expired_access_token() {
        let authority = authority(true, vec![hs256_definition("r")]);
        let token = expired_token();
        assert!(!authority.verify("r", &token).expect("verify"));

        let refresh_token = refresh_token_for(&token, Some(unix_now() + 60));
        let renewed = authority
            .refresh("r", &token, &refresh_token)
            .expect("refresh");
        let claims = authority
            .inspect("r", &renewed.token)
            .expect("inspect")
            .expect("renewed token is valid");
        assert_eq!(claims.payload.as_deref(), Some("old"));
        assert!(renewed.refresh_token.is_some());
    }

    #[test]
    fn test_refresh_rejects_forged_access_token() {
        let authority = authority(true, vec![hs256_definition("r")]);
        let tokens = authority.sign("r", params("u1")).expect("sign");
        let refresh_token = tokens.refresh_token.expect("refresh token");
        assert_eq!(
            authority.refresh("r", "forged.token.value", &refresh_token),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_refresh_rejects_invalid_refresh_token() {
        let authority = authority(true, vec![hs256_definition("r")]);
        let tokens = authority.sign("r", params("u1")).expect("sign");
        // an access token is not a valid refresh token: different secret
        assert_eq!(
            authority.refresh("r", &tokens.token, &tokens.token),
            Err(AuthError::InvalidRefreshToken)
        );
    }

    #[test]
    fn test_refresh_rejects_expired_refresh_token() {
        let authority = authority(true, vec![hs256_definition("r")]);
        let tokens = authority.sign("r", params("u1")).expect("sign");

        let live = refresh_token_for(&tokens.token, None);
        assert!(authority.refresh("r", &tokens.token, &live).is_ok());

        let expired = refresh_token_for(&tokens.token, Some(unix_now() - 1));
        assert_eq!(
            authority.refresh("r", &tokens.token, &expired),
            Err(AuthError::InvalidRefreshToken)
        );
    }

    #[test]
    fn test_strict_binding_rejects_foreign_access_token() {
        let authority = authority(true, vec![hs256_definition("r")]);
        let first = authority.sign("r", params("u1")).expect("sign");
        let second = authority.sign("r", params("u2")).expect("sign");
        let first_refresh = first.refresh_token.expect("refresh token");

        assert_eq!(
            authority.refresh("r", &second.token, &first_refresh),
            Err(AuthError::InvalidRefreshToken)
        );
    }

    #[test]
    fn test_reports_binding_mode() {
        assert!(authority(true, Vec::new()).strict_refresh_binding());
        assert!(!authority(false, Vec::new()).strict_refresh_binding());
    }

    #[test]
    fn test_lenient_binding_accepts_foreign_access_token() {
        let authority = authority(false, vec![hs256_definition("r")]);
        let first = authority.sign("r", params("u1")).expect("sign");
        let second = authority.sign("r", params("u2")).expect("sign");
        let first_refresh = first.refresh_token.expect("refresh token");

        let renewed = authority
            .refresh("r", &second.token, &first_refresh)
            .expect("refresh");
        let claims = authority
            .inspect("r", &renewed.token)
            .expect("inspect")
            .expect("valid");
        assert_eq!(claims.payload.as_deref(), Some("u2"));
    }

    #[test]
    fn test_refresh_unsupported_without_updater() {
        let definition = RuleDefinition {
            updater: CodecSpec::default(),
            ..hs256_definition("r")
        };
        let authority = authority(true, vec![definition]);
        let tokens = authority.sign("r", params("u1")).expect("sign");
        assert_eq!(
            authority.refresh("r", &tokens.token, "anything"),
            Err(AuthError::RefreshUnsupported("r".to_string()))
        );
    }
}
