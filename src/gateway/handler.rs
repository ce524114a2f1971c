//! Proxy request handler.
//!
//! Each request walks one fixed sequence of states; any state can end the
//! request with an error response:
//!
//! ```text
//! MethodCheck -> ConfigCheck -> BodyParsed
//!   [quota gate] BearerExtracted -> TokenAcquired -> IdentityVerified
//!                -> QuotaRead -> QuotaResetApplied -> Admitted | Rejected(429)
//!   -> UpstreamCalled
//!   [quota gate] -> QuotaRecorded
//!   -> Responded
//! ```
//!
//! Everything up to `BodyParsed` (and bearer extraction) is local, so
//! method, configuration, body and missing-header failures never reach the
//! network. Quota is written only after the upstream call succeeded.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::router::AppState;
use crate::config::{QuotaConfig, QuotaSecrets};
use crate::identity::{IdentityVerifier, bearer_token};
use crate::oauth::{AccessToken, AssertionSigner, ServiceAccountCredential, TokenExchanger};
use crate::quota::audit::{self, QuotaEvent};
use crate::quota::{
    DAILY_CALL_CEILING, FirestoreQuotaStore, QuotaRecord, QuotaStore, admit, apply_daily_reset,
};
use crate::{Error, Result};

/// Everything the quota gate needs for one request
pub struct QuotaGate {
    signer: AssertionSigner,
    exchanger: TokenExchanger,
    identity: IdentityVerifier,
    store: Arc<dyn QuotaStore>,
    scope: String,
}

/// A request that passed the quota check
struct Admission {
    uid: String,
    record: QuotaRecord,
    token: AccessToken,
}

impl QuotaGate {
    /// Assemble a gate from ready-made parts
    #[must_use]
    pub fn new(
        signer: AssertionSigner,
        exchanger: TokenExchanger,
        identity: IdentityVerifier,
        store: Arc<dyn QuotaStore>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            signer,
            exchanger,
            identity,
            store,
            scope: scope.into(),
        }
    }

    /// Build the gate from configuration and resolved secrets.
    ///
    /// Imports the service-account key once; a bad key or a missing secret is
    /// returned as an error for the caller to report per request.
    pub fn from_config(config: &QuotaConfig, secrets: &QuotaSecrets) -> Result<Self> {
        let sa_json = secrets
            .service_account_json
            .as_deref()
            .ok_or_else(|| Error::Config("service account JSON is not set".to_string()))?;
        let identity_key = secrets
            .identity_api_key
            .as_deref()
            .ok_or_else(|| Error::Config("identity API key is not set".to_string()))?;

        let credential = ServiceAccountCredential::from_json(sa_json)?;
        let project_id = config
            .project_id
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&credential.project_id);

        let signer = AssertionSigner::new(&credential, config.token_url.clone())?;
        let exchanger = TokenExchanger::new(config.token_url.clone(), config.timeout)?;
        let identity =
            IdentityVerifier::new(config.identity_lookup_url.clone(), identity_key, config.timeout)?;
        let store = FirestoreQuotaStore::new(
            &config.firestore_base_url,
            project_id,
            &config.collection,
            config.timeout,
        )?;

        info!(
            service_account = %credential.client_email,
            project = %project_id,
            collection = %config.collection,
            "Quota gate ready"
        );
        Ok(Self::new(signer, exchanger, identity, Arc::new(store), config.scope.clone()))
    }

    /// Replace the quota store
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn QuotaStore>) -> Self {
        self.store = store;
        self
    }

    /// Mint a fresh store token: sign an assertion, exchange it.
    pub async fn acquire_token(&self, now: DateTime<Utc>) -> Result<AccessToken> {
        let assertion = self.signer.sign(&self.scope, now)?;
        self.exchanger.exchange(&assertion).await
    }

    /// Run the gate up to the admission decision.
    async fn check(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Result<Admission> {
        let id_token = bearer_token(headers)?;
        let token = self.acquire_token(now).await?;
        let uid = self.identity.verify(id_token).await?.uid;

        let stored = self.store.read_quota(&uid, &token).await?;
        let record = apply_daily_reset(stored, now);
        if record != stored {
            audit::emit(&QuotaEvent::reset(&uid, &stored));
        }

        if !admit(&record, DAILY_CALL_CEILING) {
            audit::emit(&QuotaEvent::rejected(&uid, record.call_count, DAILY_CALL_CEILING));
            return Err(Error::QuotaExceeded {
                uid,
                call_count: record.call_count,
                ceiling: DAILY_CALL_CEILING,
            });
        }
        audit::emit(&QuotaEvent::admitted(&uid, record.call_count, DAILY_CALL_CEILING));

        Ok(Admission { uid, record, token })
    }

    /// Record a successful call. A failed write is logged, not returned.
    async fn record(&self, admission: &Admission, now: DateTime<Utc>) {
        let next = admission.record.call_count.saturating_add(1);
        match self
            .store
            .record_success(&admission.uid, &admission.record, now, &admission.token)
            .await
        {
            Ok(()) => audit::emit(&QuotaEvent::recorded(&admission.uid, next)),
            Err(e) => audit::emit(&QuotaEvent::record_failed(&admission.uid, next, e.to_string())),
        }
    }
}

/// Whether the quota gate runs, and whether it could be built
pub enum QuotaStage {
    /// Requests go straight upstream
    Disabled,
    /// Every request is gated
    Ready(Arc<QuotaGate>),
    /// Enabled but unusable; every request fails at ConfigCheck
    Misconfigured(String),
}

impl QuotaStage {
    /// Short label for logs and the health endpoint
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Ready(_) => "enabled",
            Self::Misconfigured(_) => "misconfigured",
        }
    }
}

/// `ANY {server.path}`: the proxy entry point
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let deadline = state.request_timeout;
    match tokio::time::timeout(deadline, handle(&state, &method, &headers, body)).await {
        Ok(Ok(payload)) => (StatusCode::OK, Json(payload)).into_response(),
        Ok(Err(e)) => e.into_response(),
        // Dropping the future abandons any pending call; quota is written last
        Err(_) => Error::Timeout(deadline).into_response(),
    }
}

#[instrument(skip_all, fields(method = %method))]
async fn handle(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Value> {
    // MethodCheck
    if *method != Method::POST {
        return Err(Error::MethodNotAllowed(method.to_string()));
    }

    // ConfigCheck
    let api_key = state
        .upstream_key
        .as_deref()
        .ok_or_else(|| Error::Config("upstream API key is not set".to_string()))?;
    let gate = match &state.quota {
        QuotaStage::Disabled => None,
        QuotaStage::Ready(gate) => Some(gate),
        QuotaStage::Misconfigured(reason) => return Err(Error::Config(reason.clone())),
    };

    // Body limit and read failures surface here, after the local checks
    let body = body?;
    let inbound: Value = serde_json::from_slice(&body)
        .map_err(|e| Error::BadRequest(format!("request body is not JSON: {e}")))?;
    let outbound = state.upstream.prepare(inbound)?;

    let admission = match gate {
        Some(gate) => Some(gate.check(headers, state.clock.now()).await?),
        None => None,
    };

    let payload = state.upstream.dispatch(&outbound, api_key).await?;

    if let (Some(gate), Some(admission)) = (gate, &admission) {
        gate.record(admission, state.clock.now()).await;
    }

    debug!(gated = admission.is_some(), "Request completed");
    Ok(payload)
}
