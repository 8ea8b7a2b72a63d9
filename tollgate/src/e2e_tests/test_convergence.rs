//! Several instances over one store converge on the same rules.

use axum::http::{Method, StatusCode};
use serde_json::json;

use crate::e2e_tests::helpers::*;

#[tokio::test]
async fn test_rule_added_on_one_instance_reaches_the_other() {
    let first = TestService::new().await;
    let second = first.sibling().await;

    first.add_rule(hs256_rule("shared", "k")).await;
    second.wait_for_rule("shared", true).await;

    // a token issued by one instance verifies on the other
    let body = first.sign("shared", "user").await;
    let token = body["token"].as_str().expect("token");
    assert!(second.verify("shared", token).await);
}

#[tokio::test]
async fn test_delete_on_one_instance_reaches_the_other() {
    let first = TestService::new().await;
    let second = first.sibling().await;
    first.add_rule(hs256_rule("shared", "k")).await;
    second.wait_for_rule("shared", true).await;

    let (status, _) = second
        .call(Method::DELETE, &rule_path("shared"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    first.wait_for_rule("shared", false).await;
    second.wait_for_rule("shared", false).await;
}

#[tokio::test]
async fn test_late_instance_loads_existing_rules() {
    let first = TestService::new().await;
    first.add_rule(hs256_rule("early", "k")).await;

    let late = first.sibling().await;
    assert!(late.has_rule("early"));
}

#[tokio::test]
async fn test_replacement_converges() {
    let first = TestService::new().await;
    let second = first.sibling().await;
    first.add_rule(hs256_rule("shared", "v1")).await;
    second.wait_for_rule("shared", true).await;

    let (status, _) = second
        .call(
            Method::PUT,
            &rule_path("shared"),
            Some(json!({"authorizer": {"type": "JWT_HS256", "config": {"secret": "v2"}}})),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    for service in [&first, &second] {
        wait_until(|| {
            service
                .registry()
                .get("shared")
                .expect("registry")
                .is_some_and(|rule| rule.definition().authorizer.config.contains("v2"))
        })
        .await;
    }
}
