//! GenAI Gateway Library
//!
//! Server-side gateway between a client application and a generative-AI API.
//!
//! # Features
//!
//! - **Key custody**: the upstream API key never leaves the server
//! - **Adapters**: Gemini pass-through or Workers AI with schema translation
//! - **Quota gate**: identity-verified, 20 calls per user per UTC day, counted
//!   in a remote document store authorized by a service-account OAuth token
//! - **Production Ready**: structured logging, bounded outbound calls,
//!   graceful shutdown
//!
//! # Request flow
//!
//! Identity verification, quota read, admission, upstream call, quota write.
//! The store token is minted fresh (RS256 assertion, then token exchange) for
//! every gated request.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod oauth;
pub mod quota;
pub mod upstream;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` overrides `level`. `format` is `json` or plain text.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("failed to install tracing subscriber: {e}")))
}
