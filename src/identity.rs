//! End-user identity verification.
//!
//! # Verification flow
//!
//! 1. Extract the identity token from `Authorization: Bearer <token>`. This is
//!    a local check: a missing or malformed header is rejected before any
//!    outbound call.
//! 2. `POST {lookup_url}?key={api_key}` with `{"idToken": <token>}`.
//! 3. Take `localId` of the first entry in the returned `users` array as the
//!    stable user id.
//!
//! A 4xx from the lookup endpoint or an empty `users` array means the token
//! was rejected ([`Error::InvalidToken`], 401). Transport failures and 5xx are
//! server-side problems ([`Error::IdentityLookup`], 500).

use std::time::Duration;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Identity Toolkit account lookup endpoint
pub const DEFAULT_LOOKUP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:lookup";

/// Verified caller identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    /// Stable user id
    pub uid: String,
}

/// Account lookup response
#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    #[serde(default)]
    local_id: Option<String>,
}

/// Extract the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| Error::Unauthorized("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| Error::Unauthorized("Authorization header is not ASCII".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or_else(|| Error::Unauthorized("Authorization scheme is not Bearer".to_string()))?
        .trim();

    if token.is_empty() {
        return Err(Error::Unauthorized("empty bearer token".to_string()));
    }
    Ok(token)
}

/// Verifies identity tokens against the account lookup endpoint
#[derive(Debug, Clone)]
pub struct IdentityVerifier {
    http: Client,
    lookup_url: String,
    api_key: String,
}

impl IdentityVerifier {
    /// Create a verifier using a dedicated identity-platform API key
    pub fn new(
        lookup_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build identity client: {e}")))?;
        Ok(Self {
            http,
            lookup_url: lookup_url.into(),
            api_key: api_key.into(),
        })
    }

    /// Resolve `id_token` to a user id.
    pub async fn verify(&self, id_token: &str) -> Result<IdentityClaim> {
        let response = self
            .http
            .post(&self.lookup_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "idToken": id_token }))
            .send()
            .await
            .map_err(|e| Error::IdentityLookup(format!("lookup request failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), body = %body, "Identity token rejected");
            return Err(Error::InvalidToken(format!("lookup returned HTTP {status}")));
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), "Identity lookup endpoint failed");
            return Err(Error::IdentityLookup(format!("lookup returned HTTP {status}")));
        }

        let parsed: LookupResponse = response
            .json()
            .await
            .map_err(|e| Error::IdentityLookup(format!("failed to parse lookup response: {e}")))?;

        let uid = parsed
            .users
            .into_iter()
            .next()
            .and_then(|user| user.local_id)
            .filter(|uid| !uid.trim().is_empty())
            .ok_or_else(|| Error::InvalidToken("no user matches the token".to_string()))?;

        debug!(uid = %uid, "Identity verified");
        Ok(IdentityClaim { uid })
    }
}
