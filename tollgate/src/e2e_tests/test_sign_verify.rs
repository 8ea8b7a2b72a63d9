//! Issuing and verifying tokens over `/auth`.

use axum::http::{Method, StatusCode};
use serde_json::json;

use crate::e2e_tests::helpers::*;

#[tokio::test]
async fn test_sign_returns_token_pair() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("app", "k")).await;

    let body = service.sign("app", "user-42").await;
    let token = body["token"].as_str().expect("token");
    assert_eq!(token.split('.').count(), 3);
    assert!(body["refresh_token"].is_string());
    assert!(service.verify("app", token).await);
}

#[tokio::test]
async fn test_sign_without_updater_omits_refresh_token() {
    let service = TestService::new().await;
    service.add_rule(access_only_rule("plain")).await;

    let body = service.sign("plain", "p").await;
    assert!(body["token"].is_string());
    assert!(body.get("refresh_token").is_none());
}

#[tokio::test]
async fn test_tampered_token_fails_verification() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("app", "k")).await;

    let body = service.sign("app", "user").await;
    let token = body["token"].as_str().expect("token");
    let mut tampered = token.to_string();
    tampered.push('A');
    assert!(!service.verify("app", &tampered).await);
    assert!(!service.verify("app", "not-a-token").await);
}

#[tokio::test]
async fn test_token_of_another_rule_fails_verification() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("one", "first")).await;
    service.add_rule(hs256_rule("two", "second")).await;

    let body = service.sign("one", "user").await;
    let token = body["token"].as_str().expect("token");
    assert!(service.verify("one", token).await);
    assert!(!service.verify("two", token).await);
}

#[tokio::test]
async fn test_unknown_rule_is_bad_request() {
    let service = TestService::new().await;

    let (status, body) = service
        .call(Method::POST, "/auth", Some(json!({"name": "ghost"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("ghost"));

    let (status, _) = service
        .call(Method::GET, "/auth?name=ghost&token=a.b.c", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sign_carries_optional_claims() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("app", "k")).await;

    let (status, body) = service
        .call(
            Method::POST,
            "/auth",
            Some(json!({"name": "app", "payload": "p", "aud": "web", "ip": "10.0.0.1"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let token = body["token"].as_str().expect("token");
    let claims = crate::authority::Authority::new(service.registry().clone(), true)
        .inspect("app", token)
        .expect("inspect")
        .expect("claims");
    assert_eq!(claims.payload.as_deref(), Some("p"));
    assert_eq!(claims.aud.as_deref(), Some("web"));
    assert_eq!(claims.ip.as_deref(), Some("10.0.0.1"));
    assert!(claims.expires.is_some());
}
