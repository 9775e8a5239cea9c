//! Configuration loading and management.
//!
//! Loads configuration from `./config.toml` (or `$SABAI_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
///
/// Path: `./config.toml` or `$SABAI_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SabaiConfig {
    /// HTTP server settings (`[server]`).
    pub server: ServerConfig,
    /// Generative backend settings (`[llm]`).
    pub llm: LlmConfig,
    /// Persistence paths (`[store]`).
    pub store: StoreConfig,
    /// Knowledge-base retrieval settings (`[retrieval]`).
    pub retrieval: RetrievalConfig,
    /// Conversation engine tuning (`[engine]`).
    pub engine: EngineConfig,
    /// Push-notification settings (`[notify]`).
    pub notify: NotifyConfig,
}

impl SabaiConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$SABAI_CONFIG_PATH` or `./config.toml`.
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: SabaiConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(SabaiConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config file path: `$SABAI_CONFIG_PATH`, then `./config.toml`.
    fn config_path() -> PathBuf {
        std::env::var("SABAI_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Server.
        if let Some(v) = env("SABAI_HOST") {
            self.server.host = v;
        }
        if let Some(v) = env("SABAI_PORT") {
            if let Some(n) = parse_override("SABAI_PORT", &v) {
                self.server.port = n;
            }
        }

        // Store.
        if let Some(v) = env("SABAI_DB_PATH") {
            self.store.db_path = v;
        }
        if let Some(v) = env("SABAI_LOGS_DIR") {
            self.store.logs_dir = v;
        }

        // LLM.
        if let Some(v) = env("SABAI_GEMINI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = env("SABAI_GEMINI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env("SABAI_GEMINI_BASE_URL") {
            self.llm.base_url = v;
        }

        // Engine tuning.
        if let Some(v) = env("SABAI_HISTORY_WINDOW") {
            if let Some(n) = parse_override("SABAI_HISTORY_WINDOW", &v) {
                self.engine.history_window = n;
            }
        }
        if let Some(v) = env("SABAI_RISK_INTERVAL") {
            if let Some(n) = parse_override("SABAI_RISK_INTERVAL", &v) {
                self.engine.risk_interval = n;
            }
        }
        if let Some(v) = env("SABAI_RETRIEVAL_FAN_OUT") {
            if let Some(n) = parse_override("SABAI_RETRIEVAL_FAN_OUT", &v) {
                self.retrieval.fan_out = n;
            }
        }

        // Notify.
        if let Some(v) = env("SABAI_PUSH_ENDPOINT") {
            self.notify.endpoint = Some(v);
        }
        if let Some(v) = env("SABAI_PUSH_AUTH_TOKEN") {
            self.notify.auth_token = Some(v);
        }
    }

    /// Parse a TOML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid config TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: SabaiConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

/// Parse an env override value, warning and keeping the current setting when
/// it does not parse.
fn parse_override<T: std::str::FromStr>(var: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(var, value = %value, "ignoring invalid env override");
            None
        }
    }
}

// ── Server config ───────────────────────────────────────────────

/// HTTP server settings (`[server]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

// ── LLM config ──────────────────────────────────────────────────

/// Generative backend settings (`[llm]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key for the Gemini backend. Required for `serve`.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// API base URL (override for testing against a local stub).
    pub base_url: String,
    /// Upper bound on a single generation round trip, in seconds.
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout_seconds: 30,
        }
    }
}

// ── Store config ────────────────────────────────────────────────

/// Persistence paths (`[store]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file path.
    pub db_path: String,
    /// Directory for rotated JSON log files.
    pub logs_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "sabai.db".to_string(),
            logs_dir: "logs".to_string(),
        }
    }
}

// ── Retrieval config ────────────────────────────────────────────

/// Knowledge-base retrieval settings (`[retrieval]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of passages fetched per query.
    pub fan_out: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { fan_out: 5 }
    }
}

// ── Engine config ───────────────────────────────────────────────

/// Conversation engine tuning (`[engine]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of prior turns included in the prompt history window.
    pub history_window: usize,
    /// Risk classification fires every `risk_interval` completed turns.
    pub risk_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_window: 5,
            risk_interval: 5,
        }
    }
}

// ── Notify config ───────────────────────────────────────────────

/// Push-notification settings (`[notify]`).
///
/// When `endpoint` is unset, notification requests are accepted but dropped
/// with a warning — delivery is always fire-and-forget.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Push delivery HTTP endpoint.
    pub endpoint: Option<String>,
    /// Bearer token for the delivery endpoint.
    pub auth_token: Option<String>,
}
