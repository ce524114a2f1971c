//! Upstream generative-AI dispatch.
//!
//! The server-held API key is attached here and never leaves the gateway.
//! Two adapters are supported:
//!
//! - [`UpstreamAdapter::Gemini`]: `POST {endpoint}?key={api_key}`, body and
//!   response passed through verbatim.
//! - [`UpstreamAdapter::WorkersAi`]: the Gemini-style body is translated to a
//!   flat `messages` request, sent with `Authorization: Bearer {api_key}`, and
//!   the completion is wrapped back into a `candidates` envelope.
//!
//! A non-success upstream status becomes [`Error::Upstream`]; the upstream's
//! error body is logged here and never forwarded to the client.

pub mod translate;

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::{Error, Result};

/// Default Gemini `generateContent` endpoint
pub const DEFAULT_GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent";

/// Default Workers AI model endpoint (account id expanded from the environment)
pub const DEFAULT_WORKERS_AI_ENDPOINT: &str = "https://api.cloudflare.com/client/v4/accounts/${CLOUDFLARE_ACCOUNT_ID}/ai/run/@cf/meta/llama-3-8b-instruct";

/// Default completion cap for the translating adapter
pub const DEFAULT_MAX_TOKENS: u32 = 1500;

/// Which upstream API the gateway fronts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamAdapter {
    /// Gemini pass-through
    #[default]
    Gemini,
    /// Cloudflare Workers AI with schema translation
    WorkersAi,
}

impl UpstreamAdapter {
    /// Default endpoint for this adapter
    #[must_use]
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::Gemini => DEFAULT_GEMINI_ENDPOINT,
            Self::WorkersAi => DEFAULT_WORKERS_AI_ENDPOINT,
        }
    }

    /// Default secret reference for this adapter's API key
    #[must_use]
    pub fn default_api_key_ref(self) -> &'static str {
        match self {
            Self::Gemini => "env:GEMINI_API_KEY",
            Self::WorkersAi => "env:CLOUDFLARE_API_TOKEN",
        }
    }
}

impl fmt::Display for UpstreamAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::WorkersAi => write!(f, "workers_ai"),
        }
    }
}

/// Forwards validated requests to the configured upstream
#[derive(Debug, Clone)]
pub struct UpstreamDispatcher {
    http: Client,
    adapter: UpstreamAdapter,
    endpoint: String,
    max_tokens: u32,
}

impl UpstreamDispatcher {
    /// Create a dispatcher with a bounded request timeout
    pub fn new(
        adapter: UpstreamAdapter,
        endpoint: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build upstream client: {e}")))?;
        Ok(Self {
            http,
            adapter,
            endpoint: endpoint.into(),
            max_tokens,
        })
    }

    /// Selected adapter
    #[must_use]
    pub fn adapter(&self) -> UpstreamAdapter {
        self.adapter
    }

    /// Upstream endpoint URL
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Turn the inbound body into the upstream request body.
    ///
    /// Pure; run before any network call so a malformed body costs nothing.
    pub fn prepare(&self, body: Value) -> Result<Value> {
        match self.adapter {
            UpstreamAdapter::Gemini => Ok(body),
            UpstreamAdapter::WorkersAi => {
                let request = translate::to_chat_request(&body, self.max_tokens)?;
                Ok(serde_json::to_value(request)?)
            }
        }
    }

    /// Send a prepared body upstream and return the client-facing JSON.
    pub async fn dispatch(&self, body: &Value, api_key: &str) -> Result<Value> {
        let request = match self.adapter {
            UpstreamAdapter::Gemini => self.http.post(&self.endpoint).query(&[("key", api_key)]),
            UpstreamAdapter::WorkersAi => self.http.post(&self.endpoint).bearer_auth(api_key),
        };

        let response = request.json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                adapter = %self.adapter,
                status = status.as_u16(),
                body = %body,
                "Upstream API error"
            );
            return Err(Error::Upstream {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("upstream returned invalid JSON: {e}")))?;
        debug!(adapter = %self.adapter, "Upstream call succeeded");

        match self.adapter {
            UpstreamAdapter::Gemini => Ok(payload),
            UpstreamAdapter::WorkersAi => Ok(translate::to_candidates(translate::completion_text(
                &payload,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn dispatcher(adapter: UpstreamAdapter, server: &MockServer) -> UpstreamDispatcher {
        UpstreamDispatcher::new(adapter, server.url("/model"), 1500, Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn adapter_parses_snake_case() {
        let adapter: UpstreamAdapter = serde_json::from_str("\"workers_ai\"").unwrap();
        assert_eq!(adapter, UpstreamAdapter::WorkersAi);
        assert_eq!(UpstreamAdapter::default(), UpstreamAdapter::Gemini);
        assert_eq!(adapter.to_string(), "workers_ai");
    }

    #[test]
    fn gemini_prepare_is_identity() {
        let d = UpstreamDispatcher::new(
            UpstreamAdapter::Gemini,
            DEFAULT_GEMINI_ENDPOINT,
            1500,
            Duration::from_secs(1),
        )
        .unwrap();
        let body = json!({ "contents": [], "generationConfig": { "temperature": 0.2 } });
        assert_eq!(d.prepare(body.clone()).unwrap(), body);
    }

    #[tokio::test]
    async fn gemini_passes_body_and_key_through() {
        // GIVEN: an upstream that expects the key as a query parameter
        let server = MockServer::start_async().await;
        let upstream = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/model")
                    .query_param("key", "server-key")
                    .header("content-type", "application/json")
                    .json_body(json!({ "contents": [{ "parts": [{ "text": "hi" }] }] }));
                then.status(200)
                    .json_body(json!({ "candidates": [{ "content": { "parts": [{ "text": "yo" }] } }] }));
            })
            .await;

        // WHEN: dispatching
        let d = dispatcher(UpstreamAdapter::Gemini, &server);
        let body = d
            .prepare(json!({ "contents": [{ "parts": [{ "text": "hi" }] }] }))
            .unwrap();
        let response = d.dispatch(&body, "server-key").await.unwrap();

        // THEN: the upstream JSON comes back untouched
        upstream.assert_async().await;
        assert_eq!(response["candidates"][0]["content"]["parts"][0]["text"], "yo");
    }

    #[tokio::test]
    async fn upstream_error_keeps_status_and_hides_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/model");
                then.status(503).body("internal stack trace with secrets");
            })
            .await;

        let d = dispatcher(UpstreamAdapter::Gemini, &server);
        let err = d.dispatch(&json!({}), "k").await.unwrap_err();

        match &err {
            Error::Upstream {
                status,
                status_text,
            } => {
                assert_eq!(*status, 503);
                assert_eq!(status_text, "Service Unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.client_message().contains("stack trace"));
    }

    #[tokio::test]
    async fn workers_ai_translates_both_directions() {
        // GIVEN: a Workers AI endpoint expecting bearer auth and flat messages
        let server = MockServer::start_async().await;
        let upstream = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/model")
                    .header("authorization", "Bearer cf-token")
                    .json_body(json!({
                        "messages": [
                            { "role": "system", "content": "Be brief." },
                            { "role": "user", "content": "2+2?" }
                        ],
                        "max_tokens": 1500
                    }));
                then.status(200)
                    .json_body(json!({ "result": { "response": "4" }, "success": true }));
            })
            .await;

        // WHEN: a Gemini-shaped body is dispatched
        let d = dispatcher(UpstreamAdapter::WorkersAi, &server);
        let body = d
            .prepare(json!({
                "systemInstruction": { "parts": [{ "text": "Be brief." }] },
                "contents": [{ "role": "user", "parts": [{ "text": "2+2?" }] }]
            }))
            .unwrap();
        let response = d.dispatch(&body, "cf-token").await.unwrap();

        // THEN: the completion comes back in a candidates envelope
        upstream.assert_async().await;
        assert_eq!(
            response,
            json!({
                "candidates": [{ "content": { "parts": [{ "text": "4" }], "role": "model" } }]
            })
        );
    }

    #[tokio::test]
    async fn non_json_success_is_internal_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).body("<html>");
            })
            .await;

        let d = dispatcher(UpstreamAdapter::Gemini, &server);
        assert!(matches!(
            d.dispatch(&json!({}), "k").await,
            Err(Error::Internal(_))
        ));
    }
}
