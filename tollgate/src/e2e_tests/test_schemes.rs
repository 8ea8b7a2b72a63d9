//! Rules over the national-standard schemes, end to end.

use axum::http::{Method, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use sm2::SecretKey;
use sm2::pkcs8::EncodePrivateKey;

use crate::e2e_tests::helpers::*;

fn sm2_key(seed: u8) -> String {
    let secret = SecretKey::from_slice(&[seed; 32]).expect("scalar in range");
    STANDARD.encode(secret.to_pkcs8_der().expect("pkcs8").as_bytes())
}

#[tokio::test]
async fn test_sm2_authorizer_with_sm4_updater() {
    let service = TestService::new().await;
    service
        .add_rule(json!({
            "name": "gm",
            "authorizer": {"type": "JWT_SM2", "config": {"expires": 600, "private_key": sm2_key(3)}},
            "updater": {"type": "JWT_SM4", "config": {"expires": 3600, "key": "0123456789abcdef", "iv": "42"}}
        }))
        .await;

    let body = service.sign("gm", "citizen").await;
    let token = body["token"].as_str().expect("token");
    let refresh_token = body["refresh_token"].as_str().expect("refresh token");
    assert!(service.verify("gm", token).await);

    let (status, body) = service
        .call(
            Method::PUT,
            "/auth",
            Some(json!({"name": "gm", "token": token, "refresh_token": refresh_token})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(service.verify("gm", body["token"].as_str().expect("token")).await);
}

#[tokio::test]
async fn test_sm4_token_rejected_under_other_key() {
    let service = TestService::new().await;
    for (name, key) in [("one", "0123456789abcdef"), ("two", "fedcba9876543210")] {
        service
            .add_rule(json!({
                "name": name,
                "authorizer": {"type": "JWT_SM4", "config": {"key": key}}
            }))
            .await;
    }

    let token = service.sign("one", "p").await["token"]
        .as_str()
        .expect("token")
        .to_string();
    assert!(service.verify("one", &token).await);
    assert!(!service.verify("two", &token).await);
}
