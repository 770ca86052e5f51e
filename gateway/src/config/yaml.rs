//! YAML configuration file loading
//!
//! Deserializes a partial configuration from YAML; every key is optional and
//! overrides the corresponding environment/default value.
//!
//! # Example YAML
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 4035
//! security:
//!   require_origin: true
//!   enable_origin_blocking: true
//!   origin_whitelist:
//!     - "http://localhost:3000"
//!   enable_token_check: true
//! timeouts:
//!   request_timeout_ms: 60000
//! storage:
//!   db_path: /var/lib/devicehub/auth.db
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{ConfigError, GatewayConfig};

#[derive(Debug, Default, Deserialize)]
pub struct YamlConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    security: SecuritySection,
    #[serde(default)]
    timeouts: TimeoutSection,
    #[serde(default)]
    storage: StorageSection,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
    api_name: Option<String>,
    product_name: Option<String>,
    cors_allowed_origins: Option<String>,
    rate_limit_requests_per_second: Option<u32>,
    rate_limit_burst_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SecuritySection {
    require_origin: Option<bool>,
    enable_origin_blocking: Option<bool>,
    origin_whitelist: Option<Vec<String>>,
    enable_token_check: Option<bool>,
    token_ttl_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TimeoutSection {
    request_timeout_ms: Option<u64>,
    discovery_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    db_path: Option<PathBuf>,
    storage_dir: Option<PathBuf>,
}

impl YamlConfig {
    /// Read and parse the YAML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay this partial configuration onto `base`.
    pub fn merge_into(self, mut base: GatewayConfig) -> GatewayConfig {
        if let Some(host) = self.server.host {
            base.host = host;
        }
        if let Some(port) = self.server.port {
            base.port = port;
        }
        if let Some(api_name) = self.server.api_name {
            base.api_name = api_name;
        }
        if let Some(product_name) = self.server.product_name {
            base.product_name = product_name;
        }
        if let Some(cors) = self.server.cors_allowed_origins {
            base.cors_allowed_origins = Some(cors);
        }
        if let Some(rps) = self.server.rate_limit_requests_per_second {
            base.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = self.server.rate_limit_burst_size {
            base.rate_limit_burst_size = burst;
        }
        if let Some(v) = self.security.require_origin {
            base.require_origin = v;
        }
        if let Some(v) = self.security.enable_origin_blocking {
            base.enable_origin_blocking = v;
        }
        if let Some(v) = self.security.origin_whitelist {
            base.origin_whitelist = v;
        }
        if let Some(v) = self.security.enable_token_check {
            base.enable_token_check = v;
        }
        if let Some(v) = self.security.token_ttl_seconds {
            base.token_ttl_seconds = v;
        }
        if let Some(v) = self.timeouts.request_timeout_ms {
            base.request_timeout_ms = v;
        }
        if let Some(v) = self.timeouts.discovery_timeout_ms {
            base.discovery_timeout_ms = v;
        }
        if let Some(v) = self.storage.db_path {
            base.db_path = Some(v);
        }
        if let Some(v) = self.storage.storage_dir {
            base.storage_dir = v;
        }
        base
    }
}
