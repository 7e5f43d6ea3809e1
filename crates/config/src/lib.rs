//! Configuration loading, validation, and management for docuchat.
//!
//! Loads configuration from `~/.docuchat/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! A missing Gemini API key is NOT a load failure: AI-dependent operations
//! report it per-operation so the rest of the service stays usable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.docuchat/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gemini API key. Overridable via `GEMINI_API_KEY` / `DOCUCHAT_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used for chat turns
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Model used for upload summarization
    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    /// Context budget in cost units for the selection set
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_chat_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_summary_model() -> String {
    "gemini-2.0-flash-exp".into()
}
fn default_context_budget() -> usize {
    200_000
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("chat_model", &self.chat_model)
            .field("summary_model", &self.summary_model)
            .field("context_budget", &self.context_budget)
            .field("database", &self.database)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path or `sqlite::memory:` for ephemeral databases
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "sqlite://docuchat.db".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_true")]
    pub require_pairing: bool,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_port() -> u16 {
    42810
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            require_pairing: true,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.docuchat/config.toml).
    ///
    /// Also checks environment variables for the API key:
    /// - `DOCUCHAT_API_KEY` (highest priority)
    /// - `GEMINI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply environment overrides. A set variable beats the file value.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("DOCUCHAT_API_KEY").or_else(|| var("GEMINI_API_KEY")) {
            self.api_key = Some(key);
        }

        if let Some(model) = var("DOCUCHAT_CHAT_MODEL") {
            self.chat_model = model;
        }

        if let Some(db) = var("DOCUCHAT_DATABASE") {
            self.database.path = db;
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".docuchat")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.context_budget == 0 {
            return Err(ConfigError::ValidationError(
                "context_budget must be greater than 0".into(),
            ));
        }

        if self.chat_model.trim().is_empty() || self.summary_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "chat_model and summary_model must be non-empty".into(),
            ));
        }

        Ok(())
    }

    /// Check if a Gemini API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            chat_model: default_chat_model(),
            summary_model: default_summary_model(),
            context_budget: default_context_budget(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.chat_model, "gemini-2.5-flash");
        assert_eq!(config.context_budget, 200_000);
        assert!(config.gateway.require_pairing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.chat_model, config.chat_model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn zero_budget_rejected() {
        let config = AppConfig {
            context_budget: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().summary_model, "gemini-2.0-flash-exp");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "chat_model = \"gemini-2.5-pro\"\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.chat_model, "gemini-2.5-pro");
        assert_eq!(config.context_budget, 200_000);
    }

    #[test]
    fn env_override_beats_file_value() {
        let mut config = AppConfig {
            api_key: Some("file-key".into()),
            ..AppConfig::default()
        };
        config.apply_env(|name| match name {
            "DOCUCHAT_API_KEY" => Some("env-key".into()),
            "DOCUCHAT_DATABASE" => Some("sqlite://elsewhere.db".into()),
            _ => None,
        });

        assert_eq!(config.api_key.as_deref(), Some("env-key"));
        assert_eq!(config.database.path, "sqlite://elsewhere.db");
        assert_eq!(config.chat_model, "gemini-2.5-flash");
    }

    #[test]
    fn gemini_key_var_is_fallback() {
        let mut config = AppConfig::default();
        config.apply_env(|name| match name {
            "GEMINI_API_KEY" => Some("fallback-key".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("fallback-key"));
    }

    #[test]
    fn absent_env_keeps_file_values() {
        let mut config = AppConfig {
            api_key: Some("file-key".into()),
            ..AppConfig::default()
        };
        config.apply_env(|_| None);
        assert_eq!(config.api_key.as_deref(), Some("file-key"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("AIza-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("AIza-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gemini-2.5-flash"));
        assert!(toml_str.contains("200000"));
    }
}
