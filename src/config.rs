//! Configuration loading from TOML files and environment variables.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::RelayError;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub upstream: UpstreamConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: String,

    /// Directory served for `/` and other static paths.
    pub static_dir: String,

    /// Graceful shutdown timeout (seconds).
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7373".to_string(),
            static_dir: "public".to_string(),
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Settings applied to every relayed chat request.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// System instruction sent ahead of the user's message.
    pub system_prompt: String,

    pub temperature: f32,

    pub top_p: f32,

    pub max_tokens: u32,

    /// Maximum wait for the upstream to open the stream or send the next
    /// fragment (seconds).
    pub stream_idle_timeout_secs: u64,

    /// Maximum duration of a whole SSE stream (seconds).
    pub stream_total_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: 1000,
            stream_idle_timeout_secs: 60,
            stream_total_timeout_secs: 300,
        }
    }
}

impl RelayConfig {
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn stream_total_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_total_timeout_secs)
    }
}

/// Upstream completion service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Backend provider: "openai" or "mock".
    pub provider: String,

    /// API base URL (OpenAI-compatible).
    pub api_base: String,

    /// Model identifier sent with every request.
    pub model: String,

    /// Access token (can also be set via GITHUB_TOKEN or RELAY_API_KEY).
    pub api_key: Option<String>,

    /// TCP connect timeout (seconds).
    pub connect_timeout_secs: u64,

    /// Timeout for non-streaming completions (seconds).
    pub request_timeout_secs: u64,

    /// Maximum idle connections per host in pool.
    pub pool_max_idle_per_host: usize,

    /// Delay between words for the mock provider (milliseconds).
    pub mock_token_delay_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_base: "https://models.inference.ai.azure.com".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
            pool_max_idle_per_host: 32,
            mock_token_delay_ms: 50,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn mock_token_delay(&self) -> Duration {
        Duration::from_millis(self.mock_token_delay_ms)
    }
}

/// Metrics/Prometheus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint.
    pub enabled: bool,

    /// Listen address for metrics server.
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn").
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from file, then apply environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, RelayError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(v) = var("RELAY_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(v) = var("RELAY_STATIC_DIR") {
            self.server.static_dir = v;
        }

        // Relay overrides
        if let Some(n) = var("RELAY_STREAM_IDLE_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.relay.stream_idle_timeout_secs = n;
        }
        if let Some(n) = var("RELAY_STREAM_TOTAL_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.relay.stream_total_timeout_secs = n;
        }

        // Upstream overrides
        if let Some(v) = var("RELAY_PROVIDER") {
            self.upstream.provider = v;
        }
        if let Some(v) = var("RELAY_MODEL") {
            self.upstream.model = v;
        }
        if let Some(v) = var("RELAY_API_BASE") {
            self.upstream.api_base = v;
        }
        if let Some(v) = var("GITHUB_TOKEN").or_else(|| var("RELAY_API_KEY")) {
            self.upstream.api_key = Some(v);
        }

        // Metrics overrides
        if let Some(v) = var("RELAY_METRICS_ENABLED") {
            self.metrics.enabled = v == "true" || v == "1";
        }
        if let Some(v) = var("RELAY_METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        // Logging overrides
        if let Some(v) = var("RELAY_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = var("RELAY_LOG_FORMAT") {
            self.logging.format = v;
        }
    }
}
