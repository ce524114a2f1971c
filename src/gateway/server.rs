//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::handler::{QuotaGate, QuotaStage};
use super::router::{AppState, create_router};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::quota::QuotaStore;
use crate::upstream::UpstreamDispatcher;
use crate::{Error, Result};

/// AI gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Upstream dispatcher
    upstream: UpstreamDispatcher,
    /// Resolved upstream key
    upstream_key: Option<String>,
    /// Quota gate stage
    quota: QuotaStage,
    /// Clock shared by all requests
    clock: Arc<dyn Clock>,
}

impl Gateway {
    /// Create a new gateway.
    ///
    /// Secrets are resolved and the service-account key imported here, once.
    /// Missing or unusable secrets do not fail startup; they are logged and
    /// every request then fails at ConfigCheck.
    ///
    /// # Errors
    ///
    /// Returns an error only when an HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let secrets = config.resolve_secrets();
        for name in secrets.missing() {
            warn!(secret = name, "Secret not set; requests will fail until it is configured");
        }

        let upstream = UpstreamDispatcher::new(
            config.upstream.adapter,
            config.upstream.endpoint(),
            config.upstream.max_tokens,
            config.upstream.timeout,
        )?;

        let quota = match &secrets.quota {
            None => QuotaStage::Disabled,
            Some(quota_secrets) => match QuotaGate::from_config(&config.quota, quota_secrets) {
                Ok(gate) => QuotaStage::Ready(Arc::new(gate)),
                Err(e) => {
                    warn!(error = %e, "Quota gate unavailable; gated requests will fail");
                    QuotaStage::Misconfigured(e.to_string())
                }
            },
        };

        Ok(Self {
            config,
            upstream,
            upstream_key: secrets.upstream_api_key,
            quota,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` instead of the system clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `store` for quota records instead of the configured document store.
    ///
    /// No effect unless the quota gate is ready.
    #[must_use]
    pub fn with_quota_store(mut self, store: Arc<dyn QuotaStore>) -> Self {
        if let QuotaStage::Ready(gate) = self.quota {
            let gate = Arc::try_unwrap(gate)
                .map(|gate| Arc::new(gate.with_store(store)))
                .unwrap_or_else(|shared| shared);
            self.quota = QuotaStage::Ready(gate);
        }
        self
    }

    /// Quota stage the gateway will serve with
    #[must_use]
    pub fn quota_stage(&self) -> &QuotaStage {
        &self.quota
    }

    /// Upstream dispatcher
    #[must_use]
    pub fn upstream(&self) -> &UpstreamDispatcher {
        &self.upstream
    }

    /// Build the HTTP router, consuming the gateway
    #[must_use]
    pub fn into_router(self) -> Router {
        let state = Arc::new(AppState {
            upstream: self.upstream,
            upstream_key: self.upstream_key,
            quota: self.quota,
            clock: self.clock,
            request_timeout: self.config.server.request_timeout,
        });
        create_router(state, &self.config.server)
    }

    /// Run the gateway until Ctrl-C or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid, the port cannot be bound,
    /// or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;

        let server_config = &self.config.server;
        info!("============================================================");
        info!("GENAI GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %server_config.host, port = %server_config.port, "Listening");
        info!(
            "  POST http://{}:{}{}  (proxy)",
            server_config.host, server_config.port, server_config.path
        );
        info!(adapter = %self.upstream.adapter(), endpoint = %self.upstream.endpoint(), "Upstream");
        match &self.quota {
            QuotaStage::Ready(_) => info!("QUOTA enabled (20 calls per user per UTC day)"),
            QuotaStage::Misconfigured(reason) => {
                warn!(reason = %reason, "QUOTA misconfigured - proxy requests will fail with 500");
            }
            QuotaStage::Disabled => warn!("QUOTA disabled - any caller can use the upstream key"),
        }
        if server_config.cors.enabled {
            info!(origins = ?server_config.cors.allow_origins, "CORS enabled");
        }
        info!("============================================================");

        let shutdown_timeout = server_config.shutdown_timeout;
        let app = self.into_router();

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let mut shutdown_rx = shutdown_tx.subscribe();

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .into_future();
        tokio::pin!(server);

        // Bound the drain once the signal fired
        tokio::select! {
            result = &mut server => {
                result.map_err(|e| Error::Internal(e.to_string()))?;
            }
            () = async {
                let _ = shutdown_rx.recv().await;
                tokio::time::sleep(shutdown_timeout).await;
            } => {
                warn!(timeout = ?shutdown_timeout, "Graceful shutdown timed out");
            }
        }

        info!("Gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
