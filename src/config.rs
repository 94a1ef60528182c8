// Configuration File Support
//
// This module provides configuration file parsing for the authprobe runner.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/authprobe/config.toml

use crate::tools::{ProbePolicy, DEFAULT_TIMEOUT_SECS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Probe engine configuration
    pub probe: ProbeConfig,

    /// HTTP boundary configuration
    pub server: ServerConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
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

/// Probe engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Path to the verifier binary
    pub binary: String,

    /// Endpoint used when neither the request nor the environment names one
    pub default_base_url: String,

    /// Probe budget when the request carries no override
    pub default_timeout_secs: f64,

    /// Ceiling applied to request overrides
    pub max_timeout_secs: f64,

    /// Maximum length of the failure reason, in characters
    pub reason_limit: usize,

    /// Directory sandboxes are created under (system temp dir if unset)
    pub sandbox_root: Option<String>,

    /// `fixed` or `allow_list`
    pub policy: ProbePolicy,

    /// Verifier arguments under the fixed policy
    pub fixed_args: Vec<String>,

    /// Text the fixed probe's stdout must contain
    pub marker: String,

    /// Subcommand used under the allow-list policy when the request names none
    pub default_subcommand: String,

    /// Arguments used under the allow-list policy when the request passes none
    pub default_args: Vec<String>,

    /// Optional whitelist of subcommands for the allow-list policy
    pub allowed_subcommands: Vec<String>,

    /// Flag used for the liveness check and version report
    pub liveness_flag: String,

    /// Operator-only raw credential dump
    pub debug_dump: DebugDumpConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            binary: "/app/cdx".to_string(),
            default_base_url: "http://api".to_string(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_timeout_secs: 60.0,
            reason_limit: 400,
            sandbox_root: None,
            policy: ProbePolicy::Fixed,
            fixed_args: vec![
                "exec".to_string(),
                "--sandbox".to_string(),
                "read-only".to_string(),
                "--skip-git-repo-check".to_string(),
                "Reply with the single word Banana and nothing else.".to_string(),
            ],
            marker: "Banana".to_string(),
            default_subcommand: "login".to_string(),
            default_args: vec!["status".to_string()],
            allowed_subcommands: Vec::new(),
            liveness_flag: "--wrapper-version".to_string(),
            debug_dump: DebugDumpConfig::default(),
        }
    }
}

/// Debug dump of the raw credential document
///
/// Persists secret material beyond the request. Never on by default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugDumpConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for DebugDumpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/var/lib/authprobe/debug/auth.json".to_string(),
        }
    }
}

/// HTTP boundary configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to expose `/metrics`
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the result fails validation.
    /// If the config file does not exist, returns default configuration
    /// with environment overrides applied.
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

        // Apply environment variable overrides
        let config = config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/authprobe/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "authprobe", "authprobe") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("authprobe")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - AUTHPROBE_LOG_LEVEL
    /// - AUTHPROBE_LOG_FORMAT
    /// - AUTHPROBE_BINARY
    /// - AUTHPROBE_BASE_URL
    /// - AUTHPROBE_TIMEOUT_SECS
    /// - AUTHPROBE_POLICY
    /// - AUTHPROBE_MARKER
    /// - AUTHPROBE_SANDBOX_ROOT
    /// - AUTHPROBE_PORT
    /// - AUTHPROBE_DEBUG_DUMP
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Logging overrides
        if let Some(level) = lookup("AUTHPROBE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("AUTHPROBE_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Probe overrides
        if let Some(binary) = lookup("AUTHPROBE_BINARY") {
            self.probe.binary = binary;
        }
        if let Some(url) = lookup("AUTHPROBE_BASE_URL") {
            self.probe.default_base_url = url;
        }
        if let Some(timeout) = lookup("AUTHPROBE_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<f64>() {
                if timeout.is_finite() && timeout > 0.0 {
                    self.probe.default_timeout_secs = timeout;
                }
            }
        }
        if let Some(policy) = lookup("AUTHPROBE_POLICY") {
            match policy.parse() {
                Ok(policy) => self.probe.policy = policy,
                Err(e) => tracing::warn!("Ignoring AUTHPROBE_POLICY: {}", e),
            }
        }
        if let Some(marker) = lookup("AUTHPROBE_MARKER") {
            self.probe.marker = marker;
        }
        if let Some(root) = lookup("AUTHPROBE_SANDBOX_ROOT") {
            self.probe.sandbox_root = Some(root).filter(|r| !r.is_empty());
        }
        if let Some(dump) = lookup("AUTHPROBE_DEBUG_DUMP") {
            self.probe.debug_dump.enabled = matches!(
                dump.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        // Server overrides
        if let Some(port) = lookup("AUTHPROBE_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        // Validate probe configuration
        let probe = &self.probe;
        if probe.binary.trim().is_empty() {
            anyhow::bail!("Probe binary must not be empty");
        }
        if !(probe.default_timeout_secs.is_finite() && probe.default_timeout_secs > 0.0) {
            anyhow::bail!("Default probe timeout must be > 0 seconds");
        }
        if !(probe.max_timeout_secs.is_finite() && probe.max_timeout_secs > 0.0) {
            anyhow::bail!("Maximum probe timeout must be > 0 seconds");
        }
        if probe.default_timeout_secs > probe.max_timeout_secs {
            anyhow::bail!(
                "Default probe timeout ({}s) exceeds maximum ({}s)",
                probe.default_timeout_secs,
                probe.max_timeout_secs
            );
        }
        if probe.reason_limit == 0 {
            anyhow::bail!("Reason limit must be > 0");
        }
        if probe.liveness_flag.trim().is_empty() {
            anyhow::bail!("Liveness flag must not be empty");
        }
        match probe.policy {
            ProbePolicy::Fixed => {
                if probe.fixed_args.is_empty() {
                    anyhow::bail!("Fixed probe policy requires a non-empty fixed_args");
                }
                if probe.marker.is_empty() {
                    anyhow::bail!("Fixed probe policy requires a non-empty marker");
                }
            }
            ProbePolicy::AllowList => {
                if !crate::tools::is_safe_token(&probe.default_subcommand) {
                    anyhow::bail!(
                        "Default subcommand '{}' is not a valid probe token",
                        probe.default_subcommand
                    );
                }
                if let Some(bad) = probe
                    .default_args
                    .iter()
                    .chain(probe.allowed_subcommands.iter())
                    .find(|t| !crate::tools::is_safe_token(t))
                {
                    anyhow::bail!("'{}' is not a valid probe token", bad);
                }
            }
        }
        if probe.debug_dump.enabled && probe.debug_dump.path.trim().is_empty() {
            anyhow::bail!("Debug dump is enabled but has no path");
        }

        // Validate server configuration
        if self.server.bind.trim().is_empty() {
            anyhow::bail!("Server bind address must not be empty");
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
