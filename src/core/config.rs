//! # Configuration
//!
//! Centralizes all settings with a clear override hierarchy:
//! defaults → config file → env vars → CLI flags.
//!
//! Config lives at `~/.streamchat/config.toml`. If missing on first run, a
//! commented-out default is generated so users can discover all options.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::state::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, SessionOps};

// ============================================================================
// Config Structs (all fields Option<T> for sparse TOML)
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StreamchatConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub api_url: Option<String>,
    /// 0 disables the timeout.
    pub stream_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ChatConfig {
    pub default_model: Option<String>,
    pub model_developer: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// Resolved Config (concrete values, no Options)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub model: String,
    pub model_developer: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream_timeout: Option<Duration>,
}

impl ResolvedConfig {
    /// Ops a fresh conversation starts with.
    pub fn session_ops(&self) -> SessionOps {
        SessionOps {
            model: self.model.clone(),
            model_developer: self.model_developer.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            ..SessionOps::default()
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

/// Returns the path to `~/.streamchat/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".streamchat").join("config.toml"))
}

/// Load config from `~/.streamchat/config.toml`.
///
/// If the file doesn't exist, generates a commented-out default and
/// returns `StreamchatConfig::default()`. If it exists but is malformed,
/// returns `ConfigError::Parse`.
pub fn load_config() -> Result<StreamchatConfig, ConfigError> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            warn!("Could not determine home directory, using default config");
            return Ok(StreamchatConfig::default());
        }
    };
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<StreamchatConfig, ConfigError> {
    if !path.exists() {
        info!("No config file found, generating default at {}", path.display());
        generate_default_config(path);
        return Ok(StreamchatConfig::default());
    }

    let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: StreamchatConfig = toml::from_str(&contents).map_err(ConfigError::Parse)?;
    info!("Loaded config from {}", path.display());
    debug!(
        "Config: api_url={:?}, model={:?}, token set={}",
        config.server.api_url,
        config.chat.default_model,
        config.auth.token.is_some()
    );
    Ok(config)
}

/// Generates a commented-out default config file at the given path.
fn generate_default_config(path: &Path) {
    let default_content = r#"# streamchat configuration
# All settings are optional. Defaults are used for anything not specified.
# Override hierarchy: defaults → this file → env vars → CLI flags.

# [server]
# api_url = "http://localhost:3000/api"   # Or set STREAMCHAT_API_URL
# stream_timeout_secs = 300               # 0 = no timeout

# [auth]
# token = "eyJ..."                        # Or set STREAMCHAT_TOKEN

# [chat]
# default_model = "gpt-4o-mini"           # Or set STREAMCHAT_MODEL
# model_developer = "openai"
# max_tokens = 2048
# temperature = 0.7
"#;

    if let Some(parent) = path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warn!("Failed to create config directory: {}", e);
        return;
    }
    if let Err(e) = fs::write(path, default_content) {
        warn!("Failed to write default config: {}", e);
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve the final config by collapsing: defaults → config file → env vars → CLI.
///
/// `cli_api_url` and `cli_model` are from CLI flags (None = not specified).
pub fn resolve(
    config: &StreamchatConfig,
    cli_api_url: Option<&str>,
    cli_model: Option<&str>,
) -> ResolvedConfig {
    resolve_with_env(config, cli_api_url, cli_model, |key| std::env::var(key).ok())
}

fn resolve_with_env(
    config: &StreamchatConfig,
    cli_api_url: Option<&str>,
    cli_model: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    // API URL: CLI → env → config → default
    let api_url = cli_api_url
        .map(|s| s.to_string())
        .or_else(|| env("STREAMCHAT_API_URL"))
        .or_else(|| config.server.api_url.clone())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    // Model: CLI → env → config → default
    let model = cli_model
        .map(|s| s.to_string())
        .or_else(|| env("STREAMCHAT_MODEL"))
        .or_else(|| config.chat.default_model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    // Token: env → config
    let token = env("STREAMCHAT_TOKEN")
        .or_else(|| config.auth.token.clone())
        .filter(|token| !token.is_empty());

    let stream_timeout = match config
        .server
        .stream_timeout_secs
        .unwrap_or(DEFAULT_STREAM_TIMEOUT_SECS)
    {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    ResolvedConfig {
        api_url,
        token,
        model,
        model_developer: config.chat.model_developer.clone(),
        max_tokens: config.chat.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: config.chat.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        stream_timeout,
    }
}
