//! Shared fixtures for router-level tests.
//!
//! One `httpmock` server stands in for every outbound dependency:
//!
//! | Path | Role |
//! |------|------|
//! | `/token` | OAuth2 token endpoint |
//! | `/lookup` | identity account lookup |
//! | `/v1/projects/demo/...` | document store |
//! | `/model` | upstream AI API |

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, StatusCode},
};
use chrono::{DateTime, TimeZone, Utc};
use genai_gateway::{clock::FixedClock, config::Config, gateway::Gateway};
use httpmock::prelude::*;
use serde_json::{Value, json};

pub const TEST_KEY: &str = include_str!("../fixtures/service_account_key.pem");
pub const SERVICE_ACCOUNT_EMAIL: &str = "gateway@demo.iam.gserviceaccount.com";
pub const STORE_TOKEN: &str = "ya29.store-token";
pub const ID_TOKEN: &str = "id-token-u1";
pub const UPSTREAM_KEY: &str = "server-ai-key";
pub const IDENTITY_KEY: &str = "identity-key";
pub const DOC_PATH: &str = "/v1/projects/demo/databases/(default)/documents/users/u1";

/// 2026-10-19T10:00:00Z
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap()
}

pub fn service_account_json() -> String {
    json!({
        "type": "service_account",
        "project_id": "demo",
        "private_key_id": "abc123",
        "private_key": TEST_KEY,
        "client_email": SERVICE_ACCOUNT_EMAIL,
        "token_uri": "https://oauth2.googleapis.com/token"
    })
    .to_string()
}

/// Gemini pass-through with the quota gate enabled, all endpoints on `server`.
pub fn gated_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.upstream.endpoint = Some(server.url("/model"));
    config.upstream.api_key = Some(UPSTREAM_KEY.to_string());
    config.quota.enabled = true;
    config.quota.service_account = service_account_json();
    config.quota.identity_api_key = IDENTITY_KEY.to_string();
    config.quota.token_url = server.url("/token");
    config.quota.identity_lookup_url = server.url("/lookup");
    config.quota.firestore_base_url = server.url("/v1");
    config
}

pub fn router(config: Config) -> Router {
    Gateway::new(config)
        .unwrap()
        .with_clock(Arc::new(FixedClock(now())))
        .into_router()
}

pub fn proxy_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/proxy")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {ID_TOKEN}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn chat_body() -> Value {
    json!({ "contents": [{ "role": "user", "parts": [{ "text": "Hello" }] }] })
}

pub fn upstream_reply() -> Value {
    json!({
        "candidates": [{ "content": { "parts": [{ "text": "Hi there" }], "role": "model" } }]
    })
}

pub async fn read_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Token endpoint answering every exchange with [`STORE_TOKEN`].
pub async fn mock_token<'a>(server: &'a MockServer) -> httpmock::Mock<'a> {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body(json!({
                "access_token": STORE_TOKEN,
                "expires_in": 3599,
                "token_type": "Bearer"
            }));
        })
        .await
}

/// Identity lookup resolving [`ID_TOKEN`] to `u1`.
pub async fn mock_identity<'a>(server: &'a MockServer) -> httpmock::Mock<'a> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/lookup")
                .query_param("key", IDENTITY_KEY)
                .json_body(json!({ "idToken": ID_TOKEN }));
            then.status(200)
                .json_body(json!({ "users": [{ "localId": "u1", "email": "u1@example.com" }] }));
        })
        .await
}

/// Upstream answering with [`upstream_reply`].
pub async fn mock_upstream<'a>(server: &'a MockServer) -> httpmock::Mock<'a> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/model")
                .query_param("key", UPSTREAM_KEY);
            then.status(200).json_body(upstream_reply());
        })
        .await
}
