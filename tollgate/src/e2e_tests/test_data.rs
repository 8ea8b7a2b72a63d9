//! Bulk operations over `/data/`.

use axum::http::{Method, StatusCode};

use crate::e2e_tests::helpers::*;
use crate::rule::{Rule, RuleDefinition};
use crate::store::KvBackend;

fn definition(name: &str) -> RuleDefinition {
    serde_json::from_value(hs256_rule(name, name)).expect("definition")
}

#[tokio::test]
async fn test_export_lists_every_rule() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("a", "k")).await;
    service.add_rule(access_only_rule("b")).await;

    let (status, body) = service.call(Method::GET, "/data/", None).await;
    assert_eq!(status, StatusCode::OK);
    let rules = body.as_object().expect("object");
    assert_eq!(rules.len(), 2);
    assert_eq!(body["a"]["name"], "a");
    assert_eq!(body["a"]["updater"]["type"], "JWT_HS256");
    assert_eq!(body["b"]["updater"]["type"], "");
}

#[tokio::test]
async fn test_reload_restores_registry_from_store() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("a", "k")).await;
    service.registry().remove("a").expect("remove");

    let (status, _) = service.call(Method::POST, "/data/", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(service.has_rule("a"));
}

#[tokio::test]
async fn test_reload_with_broken_entry_keeps_registry() {
    let service = TestService::new().await;
    service.add_rule(hs256_rule("a", "k")).await;

    let broken_key = format!("{}broken", service.store.rules_prefix());
    service
        .backend
        .put(&broken_key, b"{not json".to_vec())
        .await
        .expect("put");

    let (status, body) = service.call(Method::POST, "/data/", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
    assert!(service.has_rule("a"));

    service.backend.delete(&broken_key).await.expect("delete");
    let (status, _) = service.call(Method::POST, "/data/", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_save_rewrites_store_from_registry() {
    let service = TestService::new().await;
    let rule = Rule::build(definition("local")).expect("rule");
    service.registry().put(rule).expect("put");

    let (status, _) = service.call(Method::PUT, "/data/", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let stored = service
        .backend
        .get_prefix(&service.store.rules_prefix())
        .await
        .expect("get");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].key, service.store.rule_key("local"));
    let persisted = Rule::from_json(&stored[0].value).expect("rule");
    assert_eq!(persisted.definition(), &definition("local"));
}
