//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Quota-gated generative-AI gateway
#[derive(Parser, Debug)]
#[command(name = "genai-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "GENAI_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "GENAI_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "GENAI_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "GENAI_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "GENAI_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Load configuration, resolve secrets and import the key; no network calls
    Check,

    /// Mint one store access token to verify the service account
    Token,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_no_subcommand() {
        let cli = Cli::try_parse_from(["genai-gateway"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn parses_subcommands_with_global_flags() {
        let cli = Cli::try_parse_from([
            "genai-gateway",
            "check",
            "--config",
            "gateway.yaml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Command::Check)));
        assert_eq!(cli.config, Some(PathBuf::from("gateway.yaml")));
        assert_eq!(cli.log_format.as_deref(), Some("json"));
    }

    #[test]
    fn parses_server_overrides() {
        let cli =
            Cli::try_parse_from(["genai-gateway", "--port", "9000", "--host", "0.0.0.0", "serve"])
                .unwrap();
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert!(matches!(cli.command, Some(Command::Serve)));
    }
}
