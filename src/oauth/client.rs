//! OAuth2 token exchange
//!
//! Trades a signed service-account assertion for a short-lived bearer token
//! (`grant_type=urn:ietf:params:oauth:grant-type:jwt-bearer`). Tokens are
//! minted fresh for every request and never cached.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Grant type for the JWT bearer flow (RFC 7523 §2.1)
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Google's OAuth2 token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Bearer access token returned by the token endpoint
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_in: Option<u64>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl AccessToken {
    /// Wrap a raw token value
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_in: None,
        }
    }

    /// The raw token value
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Lifetime reported by the token endpoint, if any
    #[must_use]
    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Form fields for the assertion grant.
fn token_request_form(assertion: &str) -> [(&'static str, &str); 2] {
    [("grant_type", JWT_BEARER_GRANT_TYPE), ("assertion", assertion)]
}

/// Client for the OAuth2 token endpoint
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    http_client: Client,
    token_url: String,
}

impl TokenExchanger {
    /// Create an exchanger for `token_url` with a bounded request timeout
    pub fn new(token_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build token client: {e}")))?;
        Ok(Self {
            http_client,
            token_url: token_url.into(),
        })
    }

    /// Token endpoint URL (also the assertion audience)
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Exchange `assertion` for an access token.
    ///
    /// Any non-success status or a response without `access_token` is a
    /// [`Error::TokenExchange`]; there is no retry.
    pub async fn exchange(&self, assertion: &str) -> Result<AccessToken> {
        let response = self
            .http_client
            .post(&self.token_url)
            .form(&token_request_form(assertion))
            .send()
            .await
            .map_err(|e| Error::TokenExchange(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Token endpoint rejected assertion");
            return Err(Error::TokenExchange(format!("token endpoint returned HTTP {status}")));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::TokenExchange(format!("failed to parse token response: {e}")))?;

        let value = parsed
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| Error::TokenExchange("response missing access_token".to_string()))?;

        debug!(expires_in = ?parsed.expires_in, "Access token acquired");
        Ok(AccessToken {
            value,
            expires_in: parsed.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_body_carries_grant_type_and_assertion() {
        let encoded = serde_urlencoded::to_string(&token_request_form("aaa.bbb.ccc")[..]).unwrap();
        assert_eq!(
            encoded,
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer&assertion=aaa.bbb.ccc"
        );
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("ya29.secret");
        assert!(!format!("{token:?}").contains("ya29"));
        assert_eq!(token.value(), "ya29.secret");
    }

    #[test]
    fn token_response_tolerates_missing_fields() {
        let parsed: TokenResponse = serde_json::from_str(r#"{"token_type":"Bearer"}"#).unwrap();
        assert!(parsed.access_token.is_none());
        assert!(parsed.expires_in.is_none());
    }

    #[tokio::test]
    async fn exchange_returns_access_token() {
        use httpmock::prelude::*;

        // GIVEN: a token endpoint accepting the assertion grant
        let server = MockServer::start_async().await;
        let endpoint = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .header("content-type", "application/x-www-form-urlencoded");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "ya29.fresh",
                    "expires_in": 3599,
                    "token_type": "Bearer"
                }));
            })
            .await;
        let exchanger =
            TokenExchanger::new(server.url("/token"), Duration::from_secs(5)).unwrap();

        // WHEN: exchanging
        let token = exchanger.exchange("aaa.bbb.ccc").await.unwrap();

        // THEN: the token and its lifetime come back
        endpoint.assert_async().await;
        assert_eq!(token.value(), "ya29.fresh");
        assert_eq!(token.expires_in(), Some(3599));
    }

    #[tokio::test]
    async fn exchange_rejection_is_token_exchange_error() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let endpoint = server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400)
                    .json_body(serde_json::json!({ "error": "invalid_grant" }));
            })
            .await;
        let exchanger =
            TokenExchanger::new(server.url("/token"), Duration::from_secs(5)).unwrap();

        let result = exchanger.exchange("aaa.bbb.ccc").await;
        assert!(matches!(result, Err(Error::TokenExchange(_))));
        // No retry
        endpoint.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn exchange_without_access_token_field_fails() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200)
                    .json_body(serde_json::json!({ "token_type": "Bearer" }));
            })
            .await;
        let exchanger =
            TokenExchanger::new(server.url("/token"), Duration::from_secs(5)).unwrap();

        assert!(matches!(
            exchanger.exchange("a.b.c").await,
            Err(Error::TokenExchange(_))
        ));
    }
}
