//! Configuration management.
//!
//! Configuration lives in a single JSON file at `~/.yoyo/config.json`.
//!
//! # Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Defaults
//!
//! # Environment variable mapping
//!
//! - `YOYO_BIND_ADDRESS` → server.host
//! - `YOYO_PORT` → server.port
//! - `GEMINI_API_KEY` / `GOOGLE_API_KEY` → gemini.api_key
//! - `SPEECH_KEY` → speech.key
//! - `SPEECH_REGION` → speech.region
//! - `REDIS_URL` → redis.url

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".yoyo"),
        |dirs| dirs.home_dir().join(".yoyo"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Generation backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key; falls back to GEMINI_API_KEY / GOOGLE_API_KEY env vars.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
        }
    }
}

/// Speech synthesis configuration.
///
/// Missing credentials disable synthesis; the server still starts and
/// serves text-only replies.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpeechConfig {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_voice")]
    pub voice: String,
}

fn default_voice() -> String {
    "zh-CN-YunxiNeural".into()
}

/// Session store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Sliding transcript/profile retention window in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Game-mode overlay lifetime in seconds (absolute from activation).
    #[serde(default = "default_mode_ttl")]
    pub mode_ttl_secs: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

fn default_session_ttl() -> u64 {
    24 * 60 * 60
}

fn default_mode_ttl() -> u64 {
    10 * 60
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            session_ttl_secs: default_session_ttl(),
            mode_ttl_secs: default_mode_ttl(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Game-mode keyword configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Phrases that activate game mode when present in the latest user turn.
    #[serde(default = "default_start_phrases")]
    pub start_phrases: Vec<String>,
    /// Phrases that exit game mode.
    #[serde(default = "default_exit_phrases")]
    pub exit_phrases: Vec<String>,
}

fn default_start_phrases() -> Vec<String> {
    vec!["我們來玩遊戲".into(), "我们来玩游戏".into(), "玩遊戲".into()]
}

fn default_exit_phrases() -> Vec<String> {
    vec!["不玩了".into(), "結束遊戲".into(), "结束游戏".into(), "退出遊戲".into()]
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            start_phrases: default_start_phrases(),
            exit_phrases: default_exit_phrases(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub game: GameConfig,
}

impl Config {
    /// Load configuration: file if present, then environment overrides.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("YOYO_BIND_ADDRESS") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("YOYO_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.gemini.api_key = Some(key);
        } else if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
            if self.gemini.api_key.is_none() {
                self.gemini.api_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("SPEECH_KEY") {
            self.speech.key = Some(key);
        }
        if let Ok(region) = std::env::var("SPEECH_REGION") {
            self.speech.region = Some(region);
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.redis.url = url;
        }
    }
}
