//! Configuration management for Slidewin.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SlidewinError};
use crate::ratelimit::{ConsistencyMode, MalformedRecordPolicy, WindowPolicy};

/// Prefix of environment variables overriding file configuration,
/// e.g. `SLIDEWIN__STORE__URL`.
const ENV_PREFIX: &str = "SLIDEWIN";

/// Main configuration for the Slidewin service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlidewinConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

/// Which store backs the window records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Redis, shared across every instance
    #[default]
    Redis,
    /// Process-local map, only for single-instance deployments
    Memory,
}

/// Shared store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Prefix prepended to every client key. Set to `""` to read records
    /// written under the bare client IP by an earlier deployment.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Timeout for each store command in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    crate::store::DEFAULT_KEY_PREFIX.to_string()
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Rolling window in seconds
    #[serde(default = "default_window_size")]
    pub window_size_secs: u64,

    /// Requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests_per_window: u64,

    /// Bucket granularity in seconds
    #[serde(default = "default_log_interval")]
    pub log_interval_secs: u64,

    /// Fallback for stored records that fail to decode
    #[serde(default)]
    pub on_malformed_record: MalformedRecordPolicy,

    /// Write-back strategy
    #[serde(default)]
    pub consistency: ConsistencyMode,

    /// Extra attempts after a conflicting conditional write
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_size_secs: default_window_size(),
            max_requests_per_window: default_max_requests(),
            log_interval_secs: default_log_interval(),
            on_malformed_record: MalformedRecordPolicy::default(),
            consistency: ConsistencyMode::default(),
            max_cas_retries: default_max_cas_retries(),
        }
    }
}

fn default_window_size() -> u64 {
    WindowPolicy::default().window_size.as_secs()
}

fn default_max_requests() -> u64 {
    WindowPolicy::default().max_requests
}

fn default_log_interval() -> u64 {
    WindowPolicy::default().log_interval.as_secs()
}

fn default_max_cas_retries() -> u32 {
    WindowPolicy::default().max_cas_retries
}

impl From<&RateLimitingConfig> for WindowPolicy {
    fn from(config: &RateLimitingConfig) -> Self {
        WindowPolicy::new(
            Duration::from_secs(config.window_size_secs),
            config.max_requests_per_window,
            Duration::from_secs(config.log_interval_secs),
        )
        .with_malformed_record_policy(config.on_malformed_record)
        .with_consistency(config.consistency, config.max_cas_retries)
    }
}

impl SlidewinConfig {
    /// Load configuration from a YAML file, overridden by `SLIDEWIN__*`
    /// environment variables.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let config: SlidewinConfig = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SlidewinConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SlidewinError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// The window policy described by the rate limiting section.
    pub fn window_policy(&self) -> WindowPolicy {
        WindowPolicy::from(&self.rate_limiting)
    }

    /// Reject configurations the limiter would refuse at startup.
    pub fn validate(&self) -> Result<()> {
        self.window_policy()
            .validate()
            .map_err(|e| SlidewinError::Config(e.to_string()))?;

        if self.store.timeout_ms == 0 {
            return Err(SlidewinError::Config(
                "store timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
