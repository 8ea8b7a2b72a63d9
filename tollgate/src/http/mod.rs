//! HTTP interface.
//!
//! | Route | Handler |
//! |---|---|
//! | `POST /auth`, `GET /auth`, `PUT /auth` | [`auth`] |
//! | `POST /rule/`, `PUT /rule/{name}`, `DELETE /rule/{name}` | [`rules`] |
//! | `GET /data/`, `POST /data/`, `PUT /data/` | [`data`] |
//!
//! # Pre-conditions
//! - Every routed request carries a `SECRET` header equal to the shared
//!   secret. Otherwise it is answered with 401 and an empty body before any
//!   handler runs.
//!
//! # Post-conditions
//! - Failures are answered with `{"error": "..."}`: 400 for bad input, 500
//!   when the store or registry fails.

pub mod auth;
pub mod data;
mod error;
pub mod rules;

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};

pub use error::ApiError;

use crate::authority::Authority;
use crate::store::{KvBackend, RuleStore};

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "SECRET";

/// Shared state of every handler.
pub struct AppState<B> {
    pub authority: Arc<Authority>,
    pub store: Arc<RuleStore<B>>,
    pub secret: Arc<str>,
}

impl<B> AppState<B> {
    #[must_use]
    pub fn new(authority: Arc<Authority>, store: Arc<RuleStore<B>>, secret: &str) -> Self {
        Self {
            authority,
            store,
            secret: Arc::from(secret),
        }
    }
}

// Derived Clone would require `B: Clone`.
impl<B> Clone for AppState<B> {
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn clone(&self) -> Self {
        Self {
            authority: Arc::clone(&self.authority),
            store: Arc::clone(&self.store),
            secret: Arc::clone(&self.secret),
        }
    }
}

/// Build the service router.
#[must_use]
#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
pub fn router<B: KvBackend>(state: AppState<B>) -> Router {
    Router::new()
        .route(
            "/auth",
            post(auth::sign::<B>)
                .get(auth::verify::<B>)
                .put(auth::refresh::<B>),
        )
        .route("/rule/", post(rules::add::<B>))
        .route(
            "/rule/{name}",
            put(rules::replace::<B>).delete(rules::delete::<B>),
        )
        .route(
            "/data/",
            get(data::export::<B>)
                .post(data::load::<B>)
                .put(data::save::<B>),
        )
        // route_layer keeps unknown paths at 404
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.secret),
            require_secret,
        ))
        .with_state(state)
}

async fn require_secret(State(secret): State<Arc<str>>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(SECRET_HEADER)
        .map(axum::http::HeaderValue::as_bytes);
    if presented != Some(secret.as_bytes()) {
        tracing::debug!("Rejected {} {}: bad secret", request.method(), request.uri().path());
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(request).await
}

/// Reject a missing or empty required field.
pub(crate) fn required(field: &str, value: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(())
}
