//! Configuration management

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_DB_PATH: &str = "chat_history.db";
const DEFAULT_MAX_HISTORY: usize = 12;
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_TIMEOUT_SECS: u64 = 15;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly, professional and empathetic assistant that replies \
like a human. Keep answers concise, helpful, and polite. Use natural language.";

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Configuration errors (all fatal at startup)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token (BotFather)
    pub telegram_token: String,

    /// Gemini API key
    pub gemini_api_key: String,

    /// Gemini model name
    pub model_name: String,

    /// SQLite database path for conversation history
    pub db_path: PathBuf,

    /// Instruction prepended to every conversation
    pub system_prompt: String,

    /// Number of past turns replayed to the model
    pub max_history_messages: usize,

    /// Bind address
    pub host: IpAddr,

    /// Port number
    pub port: u16,

    /// Telegram Bot API base URL
    pub telegram_api_base: String,

    /// Gemini API base URL
    pub gemini_api_base: String,

    /// Per-call timeout for outbound HTTP requests
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let telegram_token = get("TELEGRAM_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_TOKEN"))?;
        let gemini_api_key = get("GEMINI_API_KEY").ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;

        let model_name = get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let db_path = get("SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let system_prompt = get("SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let max_history_messages = parse_or("MAX_HISTORY_MESSAGES", get("MAX_HISTORY_MESSAGES"), DEFAULT_MAX_HISTORY)?;
        let host = parse_or("HOST", get("HOST"), IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;
        let timeout_secs = parse_or("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"), DEFAULT_TIMEOUT_SECS)?;

        let telegram_api_base = get("TELEGRAM_API_BASE")
            .unwrap_or_else(|| TELEGRAM_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let gemini_api_base = get("GEMINI_API_BASE")
            .unwrap_or_else(|| GEMINI_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            telegram_token,
            gemini_api_key,
            model_name,
            db_path,
            system_prompt,
            max_history_messages,
            host,
            port,
            telegram_api_base,
            gemini_api_base,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
