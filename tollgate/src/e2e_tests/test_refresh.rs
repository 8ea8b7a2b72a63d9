//! Refreshing a token pair over `PUT /auth`.

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};

use crate::e2e_tests::helpers::*;

async fn refresh(service: &TestService, name: &str, token: &str, refresh_token: &str) -> (StatusCode, Value) {
    service
        .call(
            Method::PUT,
            "/auth",
            Some(json!({"name": name, "token": token, "refresh_token": refresh_token})),
        )
        .await
}

fn pair(body: &Value) -> (String, String) {
    (
        body["token"].as_str().expect("token").to_string(),
        body["refresh_token"].as_str().expect("refresh token").to_string(),
    )
}

#[tokio::test]
async fn test_refresh_issues_new_pair() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("app", "k")).await;
    let (token, refresh_token) = pair(&service.sign("app", "user-7").await);

    let (status, body) = refresh(&service, "app", &token, &refresh_token).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (new_token, new_refresh) = pair(&body);
    assert!(service.verify("app", &new_token).await);

    // the new pair refreshes again
    let (status, _) = refresh(&service, "app", &new_token, &new_refresh).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_rejects_foreign_access_token() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("app", "k")).await;
    let (_, refresh_token) = pair(&service.sign("app", "alice").await);
    let (other_token, _) = pair(&service.sign("app", "bob").await);

    let (status, body) = refresh(&service, "app", &other_token, &refresh_token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_lenient_binding_accepts_foreign_access_token() {
    let service = TestService::lenient().await;
    service.add_rule(hs256_rule("app", "k")).await;
    let (_, refresh_token) = pair(&service.sign("app", "alice").await);
    let (other_token, _) = pair(&service.sign("app", "bob").await);

    let (status, _) = refresh(&service, "app", &other_token, &refresh_token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_rejects_invalid_tokens() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("app", "k")).await;
    let (token, refresh_token) = pair(&service.sign("app", "user").await);

    let (status, _) = refresh(&service, "app", "x.y.z", &refresh_token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = refresh(&service, "app", &token, "x.y.z").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // an access token is not a refresh token
    let (status, _) = refresh(&service, "app", &token, &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refresh_without_updater_is_bad_request() {
    let service = TestService::new().await;
    service.add_rule(access_only_rule("plain")).await;
    let token = service.sign("plain", "p").await["token"]
        .as_str()
        .expect("token")
        .to_string();

    let (status, body) = refresh(&service, "plain", &token, "anything").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
