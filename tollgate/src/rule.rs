//! Rules: a named authorizer plus an optional updater.
//!
//! `RuleDefinition` is the persisted JSON form. `Rule` is a definition whose
//! codecs have been constructed.
//!
//! # Invariants
//! - A `Rule` always has a constructed authorizer.
//! - An updater with a non-empty scheme always has a constructed codec.
//! - Construction is all-or-nothing: any codec failure rejects the rule.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize};

use crate::codec::{Codec, CodecError};

/// Scheme name plus its opaque JSON configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSpec {
    #[serde(rename = "type", default)]
    pub scheme: String,
    /// JSON configuration carried as a string. An inline JSON object is
    /// accepted on input and stored in its string form.
    #[serde(default, deserialize_with = "config_text")]
    pub config: String,
}

impl CodecSpec {
    #[must_use]
    pub fn new(scheme: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            config: config.into(),
        }
    }

    /// An empty scheme means "no codec".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scheme.is_empty()
    }
}

/// Persisted form of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    pub authorizer: CodecSpec,
    #[serde(default, deserialize_with = "null_as_default")]
    pub updater: CodecSpec,
}

/// Error returned when a rule cannot be decoded or built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// The rule name is empty.
    EmptyName,
    /// The authorizer codec could not be built.
    Authorizer(CodecError),
    /// The updater codec could not be built.
    Updater(CodecError),
    /// The persisted form or an encoded name could not be decoded.
    Decode(String),
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "rule name must not be empty"),
            Self::Authorizer(e) => write!(f, "authorizer: {e}"),
            Self::Updater(e) => write!(f, "updater: {e}"),
            Self::Decode(reason) => write!(f, "invalid rule encoding: {reason}"),
        }
    }
}

impl std::error::Error for RuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Authorizer(e) | Self::Updater(e) => Some(e),
            Self::EmptyName | Self::Decode(_) => None,
        }
    }
}

/// A rule with its codecs constructed.
#[derive(Debug)]
pub struct Rule {
    definition: RuleDefinition,
    authorizer: Codec,
    updater: Option<Codec>,
}

impl Rule {
    /// Build the codecs for a definition.
    ///
    /// Scheme names in the stored definition are normalised to their
    /// canonical upper-case form.
    ///
    /// # Errors
    /// Returns an error if the name is empty or either codec fails to build.
    pub fn build(mut definition: RuleDefinition) -> Result<Self, RuleError> {
        if definition.name.is_empty() {
            return Err(RuleError::EmptyName);
        }

        let authorizer = Codec::build(&definition.authorizer.scheme, &definition.authorizer.config)
            .map_err(RuleError::Authorizer)?;
        definition.authorizer.scheme = authorizer.scheme().as_str().to_string();

        let updater = if definition.updater.is_empty() {
            definition.updater.config.clear();
            None
        } else {
            let codec = Codec::build(&definition.updater.scheme, &definition.updater.config)
                .map_err(RuleError::Updater)?;
            definition.updater.scheme = codec.scheme().as_str().to_string();
            Some(codec)
        };

        Ok(Self {
            definition,
            authorizer,
            updater,
        })
    }

    /// Decode a persisted rule and build it.
    ///
    /// # Errors
    /// Returns `RuleError::Decode` for malformed JSON, otherwise as `build`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, RuleError> {
        let definition: RuleDefinition =
            serde_json::from_slice(bytes).map_err(|e| RuleError::Decode(e.to_string()))?;
        Self::build(definition)
    }

    /// Serialise the persisted form.
    ///
    /// # Errors
    /// Returns `RuleError::Decode` if serialisation fails.
    pub fn to_json(&self) -> Result<Vec<u8>, RuleError> {
        serde_json::to_vec(&self.definition).map_err(|e| RuleError::Decode(e.to_string()))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    #[must_use]
    pub const fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    #[must_use]
    pub const fn authorizer(&self) -> &Codec {
        &self.authorizer
    }

    #[must_use]
    pub const fn updater(&self) -> Option<&Codec> {
        self.updater.as_ref()
    }
}

/// Encode a rule name for use in store keys and URL paths.
#[must_use]
pub fn encode_rule_name(name: &str) -> String {
    URL_SAFE_NO_PAD.encode(name.as_bytes())
}

/// Decode a rule name produced by [`encode_rule_name`]. Trailing padding is
/// tolerated.
///
/// # Errors
/// Returns `RuleError::Decode` if the input is not base64url or not UTF-8,
/// and `RuleError::EmptyName` if it decodes to nothing.
pub fn decode_rule_name(encoded: &str) -> Result<String, RuleError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| RuleError::Decode(format!("rule name: {e}")))?;
    let name =
        String::from_utf8(bytes).map_err(|e| RuleError::Decode(format!("rule name: {e}")))?;
    if name.is_empty() {
        return Err(RuleError::EmptyName);
    }
    Ok(name)
}

fn config_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    })
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
