use crate::adaptive::BaselineMode;
use crate::error::{GateError, Result};
use crate::rate_limit::types::{FailurePolicy, WindowSpec, WindowStrategy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Address the gate listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Baseline refill rate (tokens per second)
    pub rate: f64,
    /// Baseline bucket size, also the shared window capacity
    pub bucket_size: f64,
    /// Shared counter store
    pub redis: RedisSettings,
    /// Adaptive control loop
    #[serde(default)]
    pub adaptive: AdaptiveSettings,
    /// Upstream forwarding
    #[serde(default)]
    pub upstream: UpstreamSettings,
    /// Prometheus exposition
    #[serde(default)]
    pub metrics: MetricsSettings,
    /// Grace period for in-flight requests on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

/// Redis configuration for the shared window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
    /// Prefix for window keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Expiry refreshed on each key, in seconds
    #[serde(default = "default_key_ttl")]
    pub key_ttl_secs: u64,
    /// Script (atomic) or pipeline
    #[serde(default)]
    pub strategy: WindowStrategy,
    /// Decision when Redis fails at call time
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Adaptive limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveSettings {
    /// Seconds between control cycles
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
    /// Whether bounds follow the previous cycle or the configured base
    #[serde(default)]
    pub baseline_mode: BaselineMode,
}

/// Upstream forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Upstream response bodies are truncated past this size
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_key_prefix() -> String {
    "fluxgate:window:".to_string()
}

fn default_window_ms() -> u64 {
    1000
}

fn default_key_ttl() -> u64 {
    60
}

fn default_update_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    30
}

fn default_max_response_bytes() -> usize {
    1024 * 1024
}

fn default_metrics_path() -> String {
    "/__fluxgate/metrics".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
            baseline_mode: BaselineMode::default(),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_metrics_path(),
        }
    }
}

impl RedisSettings {
    /// Window length and key TTL as a [`WindowSpec`]
    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec::new(
            Duration::from_millis(self.window_ms),
            Duration::from_secs(self.key_ttl_secs),
        )
    }
}

impl AdaptiveSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

impl GateConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parsed listen address
    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            GateError::Config(format!("Invalid listen address '{}': {}", self.listen_addr, e))
        })
    }

    /// Attempts admitted per shared window
    pub fn window_capacity(&self) -> u64 {
        self.bucket_size.floor() as u64
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_socket_addr()?;

        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(GateError::Config("rate must be > 0".to_string()));
        }

        if !self.bucket_size.is_finite() || self.bucket_size < 1.0 {
            return Err(GateError::Config("bucket_size must be >= 1".to_string()));
        }

        if !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://") {
            return Err(GateError::Config(format!(
                "Redis URL must start with redis:// or rediss://: {}",
                self.redis.url
            )));
        }

        if self.redis.window_ms == 0 {
            return Err(GateError::Config("redis.window_ms must be > 0".to_string()));
        }

        if Duration::from_secs(self.redis.key_ttl_secs) < Duration::from_millis(self.redis.window_ms) {
            return Err(GateError::Config(
                "redis.key_ttl_secs must cover at least one window".to_string(),
            ));
        }

        if self.adaptive.update_interval_secs == 0 {
            return Err(GateError::Config(
                "adaptive.update_interval_secs must be > 0".to_string(),
            ));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(GateError::Config("upstream.timeout_secs must be > 0".to_string()));
        }

        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(GateError::Config(format!(
                "metrics.path must start with '/': {}",
                self.metrics.path
            )));
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            rate: 5.0,
            bucket_size: 10.0,
            redis: RedisSettings {
                url: "redis://127.0.0.1:6379".to_string(),
                key_prefix: default_key_prefix(),
                window_ms: default_window_ms(),
                key_ttl_secs: default_key_ttl(),
                strategy: WindowStrategy::default(),
                failure_policy: FailurePolicy::default(),
            },
            adaptive: AdaptiveSettings::default(),
            upstream: UpstreamSettings::default(),
            metrics: MetricsSettings::default(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}
