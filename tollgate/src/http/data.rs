//! `/data/`: bulk export, reload and rewrite.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use super::{ApiError, AppState};
use crate::rule::RuleDefinition;
use crate::store::KvBackend;

/// `GET /data/`: every registered rule in its persisted form, by name.
pub async fn export<B: KvBackend>(
    State(state): State<AppState<B>>,
) -> Result<Json<BTreeMap<String, RuleDefinition>>, ApiError> {
    Ok(Json(state.store.registry().export_all()?))
}

/// `POST /data/`: replace the registry with what the store holds.
pub async fn load<B: KvBackend>(
    State(state): State<AppState<B>>,
) -> Result<StatusCode, ApiError> {
    let count = state.store.load_all_rules().await?;
    tracing::info!("Reloaded {count} rules from the store");
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /data/`: rewrite the store from the registry.
pub async fn save<B: KvBackend>(
    State(state): State<AppState<B>>,
) -> Result<StatusCode, ApiError> {
    let count = state.store.save_all_rules().await?;
    tracing::info!("Wrote {count} rules to the store");
    Ok(StatusCode::NO_CONTENT)
}
