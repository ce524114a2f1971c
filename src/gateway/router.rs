//! HTTP router

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{
        HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

use super::handler::{QuotaStage, proxy_handler};
use crate::clock::Clock;
use crate::config::{CorsConfig, HEALTH_PATH, ServerConfig};
use crate::error::INTERNAL_ERROR_MESSAGE;
use crate::upstream::UpstreamDispatcher;

/// Shared application state
pub struct AppState {
    /// Upstream dispatcher
    pub upstream: UpstreamDispatcher,
    /// Server-held upstream API key (`None` fails every request at ConfigCheck)
    pub upstream_key: Option<String>,
    /// Quota gate stage
    pub quota: QuotaStage,
    /// Source of "now" for assertions and quota days
    pub clock: Arc<dyn Clock>,
    /// End-to-end deadline per request
    pub request_timeout: Duration,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let router = Router::new()
        .route(HEALTH_PATH, get(health_handler))
        // Any method, so MethodCheck can answer with a JSON 405
        .route(&server.path, any(proxy_handler))
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http());

    let router = if server.cors.enabled {
        router.layer(cors_layer(&server.cors))
    } else {
        router
    };

    router.with_state(state)
}

/// CORS for browser clients; preflight requests are answered here
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if config.allow_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .allow_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
}

/// Convert a handler panic into the generic JSON 500
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "Handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": INTERNAL_ERROR_MESSAGE })),
    )
        .into_response()
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let configured =
        state.upstream_key.is_some() && !matches!(state.quota, QuotaStage::Misconfigured(_));

    Json(json!({
        "status": if configured { "ok" } else { "misconfigured" },
        "version": env!("CARGO_PKG_VERSION"),
        "adapter": state.upstream.adapter().to_string(),
        "quota": state.quota.label(),
    }))
}
