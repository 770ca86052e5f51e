//! Configuration module for the devicehub gateway
//!
//! This module handles gateway configuration from various sources: .env
//! files, YAML files, and environment variables. Priority: YAML > ENV vars >
//! defaults. The configuration is built once at startup, validated, and then
//! passed around as an immutable value; nothing mutates it afterwards.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use devicehub_gateway::config::GatewayConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = GatewayConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallback
//! let config = GatewayConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Gateway listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

mod yaml;

pub use yaml::YamlConfig;

/// Default fixed gateway identifier expected as the first URL path segment.
pub const DEFAULT_API_NAME: &str = "gotapi";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Gateway configuration
///
/// Contains everything needed to run the gateway:
/// - Server settings (host, port, CORS, rate limiting)
/// - Security policy (origin requirement, origin whitelist, token checking)
/// - Timeouts for plugin correlation and discovery fan-out
/// - Storage locations (authorization database, multipart file storage)
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Fixed gateway identifier; requests whose first path segment differs
    /// are rejected as not found.
    pub api_name: String,
    /// Human-readable product name reported by availability/system.
    pub product_name: String,

    /// Require an origin on every request; without it, origin-less requests
    /// run as the anonymous origin.
    pub require_origin: bool,
    /// Enforce the origin whitelist (when false, any unique origin passes).
    pub enable_origin_blocking: bool,
    /// Origins allowed when blocking is enabled.
    pub origin_whitelist: Vec<String>,
    /// Validate caller access tokens on non-exempt profiles.
    pub enable_token_check: bool,
    /// Lifetime of issued caller access tokens, in seconds. Zero means the
    /// tokens never expire.
    pub token_ttl_seconds: u64,

    /// Overall deadline for a plugin response, in milliseconds.
    pub request_timeout_ms: u64,
    /// Per-plugin deadline during service discovery fan-out, in milliseconds.
    pub discovery_timeout_ms: u64,

    /// Authorization store location. `None` keeps the store in memory.
    pub db_path: Option<PathBuf>,
    /// Directory where multipart file parts are persisted.
    pub storage_dir: PathBuf,

    /// Comma-separated CORS origins, `*`, or unset for same-origin only.
    pub cors_allowed_origins: Option<String>,
    /// Requests per second per client IP before throttling.
    pub rate_limit_requests_per_second: u32,
    /// Burst size for the rate limiter.
    pub rate_limit_burst_size: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4035,
            api_name: DEFAULT_API_NAME.to_string(),
            product_name: "Devicehub".to_string(),
            require_origin: false,
            enable_origin_blocking: false,
            origin_whitelist: Vec::new(),
            enable_token_check: false,
            token_ttl_seconds: 180 * 24 * 60 * 60,
            request_timeout_ms: 60_000,
            discovery_timeout_ms: 8_000,
            db_path: None,
            storage_dir: std::env::temp_dir().join("devicehub"),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables on top of defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("DEVICEHUB_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("DEVICEHUB_PORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("invalid DEVICEHUB_PORT: {port}")))?;
        }
        if let Ok(api) = std::env::var("DEVICEHUB_API_NAME") {
            config.api_name = api;
        }
        if let Ok(v) = std::env::var("DEVICEHUB_REQUIRE_ORIGIN") {
            config.require_origin = parse_bool(&v, "DEVICEHUB_REQUIRE_ORIGIN")?;
        }
        if let Ok(v) = std::env::var("DEVICEHUB_ENABLE_ORIGIN_BLOCKING") {
            config.enable_origin_blocking = parse_bool(&v, "DEVICEHUB_ENABLE_ORIGIN_BLOCKING")?;
        }
        if let Ok(v) = std::env::var("DEVICEHUB_ORIGIN_WHITELIST") {
            config.origin_whitelist = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("DEVICEHUB_ENABLE_TOKEN_CHECK") {
            config.enable_token_check = parse_bool(&v, "DEVICEHUB_ENABLE_TOKEN_CHECK")?;
        }
        if let Ok(v) = std::env::var("DEVICEHUB_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = v.parse().map_err(|_| {
                ConfigError::Invalid(format!("invalid DEVICEHUB_REQUEST_TIMEOUT_MS: {v}"))
            })?;
        }
        if let Ok(v) = std::env::var("DEVICEHUB_DB_PATH") {
            config.db_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("DEVICEHUB_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CORS_ALLOWED_ORIGINS") {
            config.cors_allowed_origins = Some(v);
        }
        if let Ok(v) = std::env::var("DEVICEHUB_RATE_LIMIT_RPS") {
            config.rate_limit_requests_per_second = v.parse().map_err(|_| {
                ConfigError::Invalid(format!("invalid DEVICEHUB_RATE_LIMIT_RPS: {v}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, falling back to environment
    /// variables (and then defaults) for unset keys.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let base = Self::from_env()?;
        let yaml = YamlConfig::load(path)?;
        let config = yaml.merge_into(base);
        config.validate()?;
        Ok(config)
    }

    /// Bind address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Sanity-check the configuration before the server starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_name.is_empty() {
            return Err(ConfigError::Invalid("api_name must not be empty".into()));
        }
        if self.api_name.contains('/') {
            return Err(ConfigError::Invalid(
                "api_name must be a single path segment".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.enable_origin_blocking && self.origin_whitelist.is_empty() {
            return Err(ConfigError::Invalid(
                "origin blocking is enabled but the whitelist is empty".into(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("invalid {key}: {value}"))),
    }
}
