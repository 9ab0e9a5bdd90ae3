//! Configuration management for the moderation runtime
//!
//! Defaults, TOML file loading, `SAFEFLOW_*` environment overrides and
//! validation. Durations are written in humantime form (`"60s"`, `"2m"`).

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::orchestrator::OrchestratorConfig;
use crate::reasoning::{InferenceOptions, LoopConfig};
use crate::rules::{PiiPolicy, RuleStoreConfig};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Environment variable error: {message}")]
    EnvError { message: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub rules: RulesConfig,
    pub pii: PiiPolicy,
    pub reasoning: ReasoningConfig,
    pub orchestrator: OrchestratorSection,
    pub audit: AuditConfig,
    pub retrieval: RetrievalConfig,
    pub logging: LoggingConfig,
}

/// Rule source and refresh schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// SQLite rule database; the platform data directory when unset.
    pub db_path: Option<PathBuf>,
    /// Install the default rules into an empty database at startup.
    pub seed_defaults: bool,
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

/// Reasoning loop and model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub max_rounds: u32,
    #[serde(with = "humantime_serde")]
    pub model_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub tool_timeout: Duration,
    /// Cases returned by `search_similar_cases`.
    pub search_top_k: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Names reported by `check_sensitive_entities`.
    pub entity_watchlist: Vec<String>,
    pub model: ModelConfig,
}

/// OpenAI-compatible model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    /// Prefer `api_key_env`; a key written here is never serialized back.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub batch_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// SQLite audit database; the platform data directory when unset.
    pub db_path: Option<PathBuf>,
    pub channel_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub publish_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RetrievalConfig {
    /// JSON array of labelled cases. Searches return nothing when unset.
    pub cases_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for RulesConfig {
    fn default() -> Self {
        let store = RuleStoreConfig::default();
        Self {
            db_path: None,
            seed_defaults: true,
            refresh_interval: store.refresh_interval,
            fetch_timeout: store.fetch_timeout,
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        let loop_defaults = LoopConfig::default();
        Self {
            max_rounds: loop_defaults.max_rounds,
            model_timeout: loop_defaults.model_timeout,
            tool_timeout: loop_defaults.tool_timeout,
            search_top_k: 3,
            max_tokens: loop_defaults.inference.max_tokens,
            temperature: loop_defaults.inference.temperature,
            entity_watchlist: Vec::new(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            request_timeout: defaults.request_timeout,
            batch_concurrency: defaults.batch_concurrency,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            channel_capacity: 1024,
            publish_timeout: OrchestratorConfig::default().publish_timeout,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Load configuration from file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: format!("{}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    /// File (when given) or defaults, then environment overrides, then
    /// validation.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        let config = base.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SAFEFLOW_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(path) = env::var("SAFEFLOW_RULES_DB") {
            self.rules.db_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = env_parse::<u64>("SAFEFLOW_RULES_REFRESH_SECS")? {
            self.rules.refresh_interval = Duration::from_secs(secs);
        }

        if let Ok(digits) = env::var("SAFEFLOW_PHONE_DIGITS") {
            self.pii.phone_digits = match digits.trim() {
                "" | "off" | "none" => None,
                n => Some(n.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "SAFEFLOW_PHONE_DIGITS".to_string(),
                    reason: "Expected a digit count or \"off\"".to_string(),
                })?),
            };
        }

        if let Some(rounds) = env_parse::<u32>("SAFEFLOW_MAX_ROUNDS")? {
            self.reasoning.max_rounds = rounds;
        }
        if let Ok(url) = env::var("SAFEFLOW_MODEL_BASE_URL") {
            self.reasoning.model.base_url = url;
        }
        if let Ok(model) = env::var("SAFEFLOW_MODEL") {
            self.reasoning.model.model = model;
        }
        if let Ok(key) = env::var("SAFEFLOW_API_KEY") {
            self.reasoning.model.api_key = Some(key);
        }

        if let Some(n) = env_parse::<usize>("SAFEFLOW_BATCH_CONCURRENCY")? {
            self.orchestrator.batch_concurrency = n;
        }

        if let Ok(path) = env::var("SAFEFLOW_AUDIT_DB") {
            self.audit.db_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = env::var("SAFEFLOW_CASES_PATH") {
            self.retrieval.cases_path = Some(PathBuf::from(path));
        }

        if let Ok(level) = env::var("SAFEFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("SAFEFLOW_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                "compact" => LogFormat::Compact,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "SAFEFLOW_LOG_FORMAT".to_string(),
                        reason: format!("Unknown format '{}'", other),
                    })
                }
            };
        }

        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging.level",
                format!("Must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let durations = [
            ("rules.refresh_interval", self.rules.refresh_interval),
            ("rules.fetch_timeout", self.rules.fetch_timeout),
            ("reasoning.model_timeout", self.reasoning.model_timeout),
            ("reasoning.tool_timeout", self.reasoning.tool_timeout),
            ("orchestrator.request_timeout", self.orchestrator.request_timeout),
            ("audit.publish_timeout", self.audit.publish_timeout),
        ];
        for (key, value) in durations {
            if value.is_zero() {
                return Err(invalid(key, "Duration must be > 0"));
            }
        }

        if self.reasoning.max_rounds == 0 {
            return Err(invalid("reasoning.max_rounds", "Must be > 0"));
        }
        if self.reasoning.search_top_k == 0 {
            return Err(invalid("reasoning.search_top_k", "Must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.reasoning.temperature) {
            return Err(invalid("reasoning.temperature", "Must be within 0.0..=2.0"));
        }
        let base_url = &self.reasoning.model.base_url;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(invalid("reasoning.model.base_url", "Must be an http(s) URL"));
        }
        if self.reasoning.model.model.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "reasoning.model.model".to_string(),
            });
        }

        if self.pii.phone_digits == Some(0) {
            return Err(invalid("pii.phone_digits", "Use no value to disable the detector"));
        }
        if self.orchestrator.batch_concurrency == 0 {
            return Err(invalid("orchestrator.batch_concurrency", "Must be > 0"));
        }
        if self.audit.channel_capacity == 0 {
            return Err(invalid("audit.channel_capacity", "Must be > 0"));
        }

        Ok(())
    }

    pub fn rule_store_config(&self) -> RuleStoreConfig {
        RuleStoreConfig {
            refresh_interval: self.rules.refresh_interval,
            fetch_timeout: self.rules.fetch_timeout,
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_rounds: self.reasoning.max_rounds,
            model_timeout: self.reasoning.model_timeout,
            tool_timeout: self.reasoning.tool_timeout,
            inference: InferenceOptions {
                max_tokens: self.reasoning.max_tokens,
                temperature: self.reasoning.temperature,
                tool_definitions: Vec::new(),
                model: None,
            },
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            request_timeout: self.orchestrator.request_timeout,
            publish_timeout: self.audit.publish_timeout,
            batch_concurrency: self.orchestrator.batch_concurrency,
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("Cannot parse '{}'", raw),
        }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::EnvError {
            message: format!("{}: {}", key, e),
        }),
    }
}
