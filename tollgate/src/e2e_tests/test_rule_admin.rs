//! Rule mutations over `/rule/`.

use axum::http::{Method, StatusCode};
use serde_json::json;

use crate::e2e_tests::helpers::*;
use crate::store::KvBackend;

#[tokio::test]
async fn test_add_rule_reaches_registry_through_the_store() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("app", "k")).await;

    let key = service.store.rule_key("app");
    let stored = service.backend.get_prefix(&key).await.expect("get");
    assert_eq!(stored.len(), 1);
    let persisted: serde_json::Value = serde_json::from_slice(&stored[0].value).expect("json");
    // inline config objects are stored in their string form
    assert!(persisted["authorizer"]["config"].is_string());
}

#[tokio::test]
async fn test_add_existing_rule_is_rejected() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("app", "k")).await;

    let (status, body) = service
        .call(Method::POST, "/rule/", Some(hs256_rule("app", "other")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("app"));
}

#[tokio::test]
async fn test_invalid_rule_is_rejected_and_not_stored() {
    let service = TestService::new().await;

    let unknown_scheme = json!({
        "name": "bad",
        "authorizer": {"type": "JWT_NONE", "config": "{}"}
    });
    let (status, _) = service
        .call(Method::POST, "/rule/", Some(unknown_scheme))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // a broken updater rejects the whole rule
    let broken_updater = json!({
        "name": "bad",
        "authorizer": {"type": "JWT_HS256", "config": {"secret": "s"}},
        "updater": {"type": "JWT_SM4", "config": {"key": "short"}}
    });
    let (status, _) = service
        .call(Method::POST, "/rule/", Some(broken_updater))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let stored = service
        .backend
        .get_prefix(&service.store.rules_prefix())
        .await
        .expect("get");
    assert!(stored.is_empty());
    assert!(!service.has_rule("bad"));
}

#[tokio::test]
async fn test_put_replaces_rule() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("app", "old")).await;
    let old_token = service.sign("app", "user").await["token"]
        .as_str()
        .expect("token")
        .to_string();

    let (status, body) = service
        .call(
            Method::PUT,
            &rule_path("app"),
            Some(json!({"authorizer": {"type": "jwt_hs256", "config": {"secret": "new"}}})),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT, "{body}");

    wait_until(|| {
        service
            .registry()
            .get("app")
            .expect("registry")
            .is_some_and(|rule| rule.updater().is_none())
    })
    .await;
    assert!(!service.verify("app", &old_token).await);
    let new_token = service.sign("app", "user").await;
    assert!(new_token.get("refresh_token").is_none());
}

#[tokio::test]
async fn test_put_creates_missing_rule() {
    let service = TestService::new().await;
    let (status, _) = service
        .call(
            Method::PUT,
            &rule_path("fresh rule/1"),
            Some(json!({"authorizer": {"type": "JWT_HS256", "config": {"secret": "s"}}, "updater": null})),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    service.wait_for_rule("fresh rule/1", true).await;
}

#[tokio::test]
async fn test_delete_rule() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("app", "k")).await;

    let (status, body) = service.call(Method::DELETE, &rule_path("app"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
    service.wait_for_rule("app", false).await;

    let (status, _) = service
        .call(Method::POST, "/auth", Some(json!({"name": "app"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_absent_rule_succeeds() {
    let service = TestService::new().await;
    let (status, _) = service.call(Method::DELETE, &rule_path("ghost"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_bad_rule_name_in_path() {
    let service = TestService::new().await;
    let (status, body) = service.call(Method::DELETE, "/rule/%21%21", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
