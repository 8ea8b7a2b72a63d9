//! `/rule/`: administrative rule mutations.
//!
//! Every mutation goes to the store only. The registry of this instance is
//! updated by the watch event the write produces, like every other instance.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::registry::RegistryError;
use crate::rule::{CodecSpec, Rule, RuleDefinition, decode_rule_name, null_as_default};
use crate::store::KvBackend;

/// Body of `PUT /rule/{name}`; the name comes from the path.
#[derive(Debug, Deserialize)]
pub struct ReplaceRuleRequest {
    pub authorizer: CodecSpec,
    #[serde(default, deserialize_with = "null_as_default")]
    pub updater: CodecSpec,
}

/// `POST /rule/`: add a rule whose name is not yet taken.
pub async fn add<B: KvBackend>(
    State(state): State<AppState<B>>,
    body: Result<Json<RuleDefinition>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(definition) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if state.store.registry().contains(&definition.name)? {
        return Err(RegistryError::AlreadyExists(definition.name).into());
    }
    let rule = Rule::build(definition)?;
    state.store.save_rule(rule.definition()).await?;
    tracing::info!("Added rule '{}'", rule.name());
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /rule/{name}`: add or replace a rule. `name` is base64url.
pub async fn replace<B: KvBackend>(
    State(state): State<AppState<B>>,
    Path(encoded): Path<String>,
    body: Result<Json<ReplaceRuleRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let name = decode_rule_name(&encoded)?;
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let rule = Rule::build(RuleDefinition {
        name,
        authorizer: request.authorizer,
        updater: request.updater,
    })?;
    state.store.save_rule(rule.definition()).await?;
    tracing::info!("Stored rule '{}'", rule.name());
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /rule/{name}`: remove a rule. Removing an absent rule succeeds.
pub async fn delete<B: KvBackend>(
    State(state): State<AppState<B>>,
    Path(encoded): Path<String>,
) -> Result<StatusCode, ApiError> {
    let name = decode_rule_name(&encoded)?;
    state.store.delete_rule(&name).await?;
    tracing::info!("Deleted rule '{name}'");
    Ok(StatusCode::NO_CONTENT)
}
