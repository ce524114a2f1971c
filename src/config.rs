//! Configuration management

use std::{env, fmt, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::identity::DEFAULT_LOOKUP_URL;
use crate::oauth::{DATASTORE_SCOPE, DEFAULT_TOKEN_URL};
use crate::quota::firestore::{DEFAULT_COLLECTION, DEFAULT_FIRESTORE_BASE_URL};
use crate::upstream::{DEFAULT_MAX_TOKENS, UpstreamAdapter};
use crate::{Error, Result};

/// Prefix for environment overrides (`GENAI_GATEWAY_SERVER__PORT=9000`)
pub const ENV_PREFIX: &str = "GENAI_GATEWAY_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving secrets.
    /// Paths support ~ expansion. Loaded in order; variables already set in
    /// the process environment win.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream AI API configuration
    pub upstream: UpstreamConfig,
    /// Per-user quota gate configuration
    pub quota: QuotaConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so ${VAR} can reference them
        config.load_env_files();
        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = match (path_str.strip_prefix('~'), dirs::home_dir()) {
                (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
                _ => path_str.clone(),
            };

            let path = Path::new(&expanded);
            if !path.exists() {
                tracing::debug!("Env file not found (skipped): {expanded}");
                continue;
            }
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in endpoint URLs
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        if let Some(endpoint) = &mut self.upstream.endpoint {
            *endpoint = Self::expand_string(&re, endpoint);
        }
        for url in [
            &mut self.quota.token_url,
            &mut self.quota.identity_lookup_url,
            &mut self.quota.firestore_base_url,
        ] {
            *url = Self::expand_string(&re, url);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Reject settings the server cannot start with.
    ///
    /// Missing secrets are not checked here; they surface per request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if !self.server.path.starts_with('/') {
            return Err(Error::Config(format!(
                "server.path must start with '/': {}",
                self.server.path
            )));
        }
        if self.server.path == HEALTH_PATH {
            return Err(Error::Config(format!(
                "server.path cannot be {HEALTH_PATH}"
            )));
        }
        if self.upstream.max_tokens == 0 {
            return Err(Error::Config("upstream.max_tokens must be positive".to_string()));
        }
        if self.server.request_timeout.is_zero() {
            return Err(Error::Config("server.request_timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Resolve every secret reference once.
    #[must_use]
    pub fn resolve_secrets(&self) -> ResolvedSecrets {
        let quota = self.quota.enabled.then(|| QuotaSecrets {
            service_account_json: resolve_secret(&self.quota.service_account),
            identity_api_key: resolve_secret(&self.quota.identity_api_key),
        });
        ResolvedSecrets {
            upstream_api_key: resolve_secret(&self.upstream.api_key_ref()),
            quota,
        }
    }
}

/// Path of the liveness endpoint
pub const HEALTH_PATH: &str = "/health";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Route the proxy handler is mounted at
    pub path: String,
    /// Deadline for one proxied request, end to end
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// CORS configuration
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            path: "/api/proxy".to_string(),
            request_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024, // 1MB
            cors: CorsConfig::default(),
        }
    }
}

/// CORS configuration for browser clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Emit CORS headers and answer preflight requests
    pub enabled: bool,
    /// Allowed origins; `*` allows any
    pub allow_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_origins: vec!["*".to_string()],
        }
    }
}

/// Upstream AI API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Which upstream API to front
    pub adapter: UpstreamAdapter,
    /// Endpoint URL (defaults per adapter; supports `${VAR}`)
    pub endpoint: Option<String>,
    /// API key (literal or `env:VAR_NAME`; defaults per adapter)
    pub api_key: Option<String>,
    /// Completion cap sent by the translating adapter
    pub max_tokens: u32,
    /// Upstream request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            adapter: UpstreamAdapter::default(),
            endpoint: None,
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(30),
        }
    }
}

impl UpstreamConfig {
    /// Configured endpoint, or the adapter's default
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.adapter.default_endpoint().to_string())
    }

    /// Configured key reference, or the adapter's default
    #[must_use]
    pub fn api_key_ref(&self) -> String {
        self.api_key
            .clone()
            .unwrap_or_else(|| self.adapter.default_api_key_ref().to_string())
    }
}

/// Per-user quota gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Gate every request on identity and daily quota
    pub enabled: bool,
    /// Service-account JSON (literal or `env:VAR_NAME`)
    pub service_account: String,
    /// Identity-platform API key for the account lookup (literal or `env:VAR_NAME`)
    pub identity_api_key: String,
    /// Overrides the service account's `project_id`
    pub project_id: Option<String>,
    /// OAuth2 token endpoint (also the assertion audience)
    pub token_url: String,
    /// Scope requested for the store token
    pub scope: String,
    /// Identity account lookup endpoint
    pub identity_lookup_url: String,
    /// Document store REST root
    pub firestore_base_url: String,
    /// Collection holding per-user documents
    pub collection: String,
    /// Timeout for token, identity and store calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_account: "env:FIREBASE_SERVICE_ACCOUNT".to_string(),
            identity_api_key: "env:FIREBASE_WEB_API_KEY".to_string(),
            project_id: None,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            scope: DATASTORE_SCOPE.to_string(),
            identity_lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            firestore_base_url: DEFAULT_FIRESTORE_BASE_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Resolve a secret reference: `env:VAR_NAME` reads the environment, anything
/// else is a literal. Blank values and unset variables resolve to `None`.
#[must_use]
pub fn resolve_secret(reference: &str) -> Option<String> {
    let value = match reference.strip_prefix("env:") {
        Some(var_name) => env::var(var_name.trim()).ok()?,
        None => reference.to_string(),
    };
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Secrets resolved at startup
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    /// Server-held upstream API key
    pub upstream_api_key: Option<String>,
    /// Quota secrets, present when the quota gate is enabled
    pub quota: Option<QuotaSecrets>,
}

/// Secrets needed by the quota gate
#[derive(Clone, Default)]
pub struct QuotaSecrets {
    /// Raw service-account JSON
    pub service_account_json: Option<String>,
    /// Identity-platform API key
    pub identity_api_key: Option<String>,
}

impl ResolvedSecrets {
    /// Names of the secrets that did not resolve
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.upstream_api_key.is_none() {
            missing.push("upstream.api_key");
        }
        if let Some(quota) = &self.quota {
            if quota.service_account_json.is_none() {
                missing.push("quota.service_account");
            }
            if quota.identity_api_key.is_none() {
                missing.push("quota.identity_api_key");
            }
        }
        missing
    }
}

fn presence<T>(value: Option<&T>) -> &'static str {
    if value.is_some() { "<set>" } else { "<missing>" }
}

impl fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("upstream_api_key", &presence(self.upstream_api_key.as_ref()))
            .field("quota", &self.quota)
            .finish()
    }
}

impl fmt::Debug for QuotaSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaSecrets")
            .field(
                "service_account_json",
                &presence(self.service_account_json.as_ref()),
            )
            .field("identity_api_key", &presence(self.identity_api_key.as_ref()))
            .finish()
    }
}

/// Human-readable `Duration` serde: `100ms`, `30s`, `5m`, or bare seconds
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (`"30s"`, or `"250ms"` when sub-second)
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration (e.g., "30s", "5m", "100ms", 30)
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };
        let s = s.trim();

        // "ms" before "s", or "100ms" would parse as "100m" + "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
