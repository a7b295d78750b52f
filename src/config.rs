// Configuration File Support
//
// Admission and logging configuration for the dispatch layer.
// Supports TOML format with environment variable overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Admission configuration
    pub admission: AdmissionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Admission configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Whether plan-gated daily quotas apply at all
    pub billing_enabled: bool,

    /// Requests per tenant per window for constrained plans. 0 = unlimited
    pub daily_request_limit: u64,

    /// Window length for the daily quota, in seconds
    pub rate_window_secs: u64,

    /// Process-wide cap on active requests per app. 0 = unlimited
    pub app_max_active_requests: u32,

    /// Admission tickets older than this are presumed leaked, in seconds
    pub ticket_max_alive_secs: u64,

    /// Minimum seconds between stale-ticket sweeps of one app
    pub sweep_interval_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            billing_enabled: false,
            daily_request_limit: 5000,
            rate_window_secs: 86400,
            app_max_active_requests: 0,
            ticket_max_alive_secs: 600,
            sweep_interval_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from a specific path
    ///
    /// Returns defaults when the file does not exist; fails only when the
    /// file exists but cannot be read or parsed. Environment variables
    /// override file values either way.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - FLOODGATE_LOG_LEVEL
    /// - FLOODGATE_LOG_FORMAT
    /// - FLOODGATE_BILLING_ENABLED
    /// - FLOODGATE_DAILY_REQUEST_LIMIT
    /// - FLOODGATE_RATE_WINDOW_SECS
    /// - FLOODGATE_APP_MAX_ACTIVE_REQUESTS
    /// - FLOODGATE_TICKET_MAX_ALIVE_SECS
    /// - FLOODGATE_SWEEP_INTERVAL_SECS
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("FLOODGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("FLOODGATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(enabled) = std::env::var("FLOODGATE_BILLING_ENABLED") {
            self.admission.billing_enabled =
                enabled.parse().unwrap_or(self.admission.billing_enabled);
        }
        if let Ok(limit) = std::env::var("FLOODGATE_DAILY_REQUEST_LIMIT") {
            if let Ok(limit) = limit.parse::<u64>() {
                self.admission.daily_request_limit = limit;
            }
        }
        if let Ok(secs) = std::env::var("FLOODGATE_RATE_WINDOW_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    self.admission.rate_window_secs = secs;
                }
            }
        }
        if let Ok(max) = std::env::var("FLOODGATE_APP_MAX_ACTIVE_REQUESTS") {
            if let Ok(max) = max.parse::<u32>() {
                self.admission.app_max_active_requests = max;
            }
        }
        if let Ok(secs) = std::env::var("FLOODGATE_TICKET_MAX_ALIVE_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.admission.ticket_max_alive_secs = secs;
            }
        }
        if let Ok(secs) = std::env::var("FLOODGATE_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.admission.sweep_interval_secs = secs;
            }
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.admission.rate_window_secs == 0 {
            anyhow::bail!("rate_window_secs must be positive");
        }
        if self.admission.ticket_max_alive_secs == 0 {
            anyhow::bail!("ticket_max_alive_secs must be positive");
        }
        match self.logging.format.as_str() {
            "json" | "pretty" | "compact" => {}
            other => anyhow::bail!("unknown log format: {}", other),
        }
        Ok(())
    }
}
