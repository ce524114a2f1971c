//! GenAI Gateway - quota-gated proxy for generative-AI APIs
//!
//! Keeps the upstream API key server-side and, when enabled, limits each
//! signed-in user to a fixed number of calls per UTC day.

use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info};

use genai_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::{Gateway, QuotaStage},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match cli.command {
        Some(Command::Check) => run_check(config),
        Some(Command::Token) => run_token(config).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Result<Config, ExitCode> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Ok(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            Err(ExitCode::FAILURE)
        }
    }
}

/// Report readiness without touching the network
fn run_check(config: Config) -> ExitCode {
    let missing = config.resolve_secrets().missing();
    let path = config.server.path.clone();

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Route:    POST {path}");
    println!(
        "Upstream: {} ({})",
        gateway.upstream().adapter(),
        gateway.upstream().endpoint()
    );
    match gateway.quota_stage() {
        QuotaStage::Disabled => println!("Quota:    disabled"),
        QuotaStage::Ready(_) => println!("Quota:    enabled, service-account key imported"),
        QuotaStage::Misconfigured(reason) => println!("Quota:    misconfigured ({reason})"),
    }

    let misconfigured = matches!(gateway.quota_stage(), QuotaStage::Misconfigured(_));
    if missing.is_empty() && !misconfigured {
        println!("\n✅ Configuration is complete");
        ExitCode::SUCCESS
    } else {
        for name in &missing {
            println!("  missing: {name}");
        }
        println!("\n❌ Configuration is incomplete");
        ExitCode::FAILURE
    }
}

/// Sign an assertion and exchange it once
async fn run_token(config: Config) -> ExitCode {
    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let gate = match gateway.quota_stage() {
        QuotaStage::Ready(gate) => gate,
        QuotaStage::Disabled => {
            eprintln!("❌ Quota gate is disabled (set quota.enabled: true)");
            return ExitCode::FAILURE;
        }
        QuotaStage::Misconfigured(reason) => {
            eprintln!("❌ Quota gate is misconfigured: {reason}");
            return ExitCode::FAILURE;
        }
    };

    match gate.acquire_token(Utc::now()).await {
        Ok(token) => {
            match token.expires_in() {
                Some(secs) => println!("✅ Access token acquired (expires in {secs}s)"),
                None => println!("✅ Access token acquired"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Token exchange failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        adapter = %config.upstream.adapter,
        quota = config.quota.enabled,
        "Starting GenAI Gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
