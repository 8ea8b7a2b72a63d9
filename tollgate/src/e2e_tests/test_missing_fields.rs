//! Requests missing required fields are rejected with 400.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::json;

use crate::e2e_tests::helpers::*;

#[tokio::test]
async fn test_sign_without_name() {
    let service = TestService::new().await;
    let (status, body) = service
        .call(Method::POST, "/auth", Some(json!({"payload": "p"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "name is required");
}

#[tokio::test]
async fn test_verify_without_token() {
    let service = TestService::new().await;
    let (status, body) = service.call(Method::GET, "/auth?name=app", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "token is required");
}

#[tokio::test]
async fn test_refresh_without_refresh_token() {
    let service = TestService::new().await;
    let (status, body) = service
        .call(
            Method::PUT,
            "/auth",
            Some(json!({"name": "app", "token": "a.b.c"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "refresh_token is required");
}

#[tokio::test]
async fn test_rule_without_authorizer() {
    let service = TestService::new().await;
    let (status, body) = service
        .call(Method::POST, "/rule/", Some(json!({"name": "r"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_rule_with_empty_name() {
    let service = TestService::new().await;
    let mut rule = hs256_rule("r", "k");
    rule["name"] = json!("");
    let (status, _) = service.call(Method::POST, "/rule/", Some(rule)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_body() {
    let service = TestService::new().await;
    let request = Request::post("/auth")
        .header(crate::http::SECRET_HEADER, SECRET)
        .header("content-type", "application/json")
        .body(Body::from("{\"name\":"))
        .expect("request");
    let (status, body) = service.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
