//! `/auth`: issue, verify and refresh tokens.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState, required};
use crate::authority::IssuedTokens;
use crate::codec::SignParams;
use crate::store::KvBackend;

#[derive(Debug, Deserialize)]
pub struct SignRequest {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub params: SignParams,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub result: bool,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub refresh_token: String,
}

/// `POST /auth`
pub async fn sign<B: KvBackend>(
    State(state): State<AppState<B>>,
    body: Result<Json<SignRequest>, JsonRejection>,
) -> Result<Json<IssuedTokens>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    required("name", &request.name)?;
    Ok(Json(state.authority.sign(&request.name, request.params)?))
}

/// `GET /auth?name=&token=`
pub async fn verify<B: KvBackend>(
    State(state): State<AppState<B>>,
    query: Result<Query<VerifyQuery>, QueryRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    required("name", &query.name)?;
    required("token", &query.token)?;
    let result = state.authority.verify(&query.name, &query.token)?;
    Ok(Json(VerifyResponse { result }))
}

/// `PUT /auth`
pub async fn refresh<B: KvBackend>(
    State(state): State<AppState<B>>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<IssuedTokens>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    required("name", &request.name)?;
    required("token", &request.token)?;
    required("refresh_token", &request.refresh_token)?;
    let tokens = state
        .authority
        .refresh(&request.name, &request.token, &request.refresh_token)?;
    Ok(Json(tokens))
}
