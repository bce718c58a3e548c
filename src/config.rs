//! # Configuration Module
//!
//! This module defines configuration structures for the intake bot,
//! including chat-completion settings, webhook settings and session
//! lifetime. Values come from environment variables (optionally loaded from
//! a `.env` file) with defaults for everything but the credentials.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::errors::ConfigError;

// Constants for bot configuration
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_MODEL_CALLS: usize = 5;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://crm.db";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const WEBHOOK_PATH: &str = "telegram";
pub const MAX_WEBHOOK_SECRET_LEN: usize = 256;

/// Chat-completion API configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Bearer token for the API
    pub api_key: String,
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    pub base_url: String,
    /// Model name sent with every request
    pub model: String,
    /// Timeout for a single chat-completion call in seconds
    pub request_timeout_secs: u64,
    /// Maximum chat-completion calls per user message (tool rounds included)
    pub max_model_calls: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_model_calls: DEFAULT_MAX_MODEL_CALLS,
        }
    }
}

impl ChatConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Webhook listener configuration; absent means long polling
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Full public URL Telegram delivers updates to
    pub url: Url,
    /// Local address the HTTP listener binds
    pub listen_addr: SocketAddr,
    /// Value expected in `X-Telegram-Bot-Api-Secret-Token`
    pub secret: String,
}

/// In-memory session lifetime configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Evict sessions idle for longer than this; `None` keeps them for the
    /// process lifetime
    pub idle_ttl_secs: Option<u64>,
    /// How often the eviction sweep runs
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: None,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl SessionConfig {
    pub fn idle_ttl(&self) -> Option<Duration> {
        self.idle_ttl_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Top-level bot configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    pub database_url: String,
    pub chat: ChatConfig,
    pub webhook: Option<WebhookConfig>,
    pub sessions: SessionConfig,
    /// Overrides the built-in assistant persona
    pub persona: Option<String>,
    /// JSON file with the services and opening hours to seed
    pub catalog_path: Option<PathBuf>,
}

impl BotConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let telegram_token =
            get("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        let api_key = get("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;

        let defaults = ChatConfig::default();
        let chat = ChatConfig {
            api_key,
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: get("OPENAI_CHAT_MODEL").unwrap_or(defaults.model),
            request_timeout_secs: parse_or(
                "OPENAI_TIMEOUT_SECS",
                get("OPENAI_TIMEOUT_SECS"),
                defaults.request_timeout_secs,
            )?,
            max_model_calls: parse_or(
                "OPENAI_MAX_MODEL_CALLS",
                get("OPENAI_MAX_MODEL_CALLS"),
                defaults.max_model_calls,
            )?,
        };
        if chat.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "OPENAI_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if chat.max_model_calls == 0 {
            return Err(ConfigError::Invalid {
                key: "OPENAI_MAX_MODEL_CALLS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let webhook = match get("WEBHOOK_PUBLIC_URL") {
            Some(public_url) => {
                let secret = get("TELEGRAM_WEBHOOK_SECRET")
                    .ok_or(ConfigError::Missing("TELEGRAM_WEBHOOK_SECRET"))?;
                validate_webhook_secret(&secret)?;
                let listen = get("WEBHOOK_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
                let listen_addr = listen.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
                    key: "WEBHOOK_LISTEN_ADDR",
                    reason: format!("{e}"),
                })?;
                Some(WebhookConfig {
                    url: webhook_url(&public_url)?,
                    listen_addr,
                    secret,
                })
            }
            None => None,
        };

        let sessions = SessionConfig {
            idle_ttl_secs: get("SESSION_IDLE_TTL_SECS")
                .map(|raw| parse_or("SESSION_IDLE_TTL_SECS", Some(raw), 0))
                .transpose()?,
            sweep_interval_secs: parse_or(
                "SESSION_SWEEP_INTERVAL_SECS",
                get("SESSION_SWEEP_INTERVAL_SECS"),
                DEFAULT_SWEEP_INTERVAL_SECS,
            )?,
        };
        if sessions.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "SESSION_SWEEP_INTERVAL_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            telegram_token,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            chat,
            webhook,
            sessions,
            persona: get("ASSISTANT_PERSONA"),
            catalog_path: get("CATALOG_PATH").map(PathBuf::from),
        })
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Build the webhook endpoint from the public base URL
pub fn webhook_url(public_url: &str) -> Result<Url, ConfigError> {
    let full = format!("{}/{}", public_url.trim_end_matches('/'), WEBHOOK_PATH);
    Url::parse(&full).map_err(|e| ConfigError::Invalid {
        key: "WEBHOOK_PUBLIC_URL",
        reason: e.to_string(),
    })
}

/// Telegram accepts 1-256 characters from `A-Z`, `a-z`, `0-9`, `_` and `-`
pub fn validate_webhook_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.is_empty() || secret.len() > MAX_WEBHOOK_SECRET_LEN {
        return Err(ConfigError::Invalid {
            key: "TELEGRAM_WEBHOOK_SECRET",
            reason: format!("length must be between 1 and {MAX_WEBHOOK_SECRET_LEN}"),
        });
    }
    if let Some(bad) = secret
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(ConfigError::Invalid {
            key: "TELEGRAM_WEBHOOK_SECRET",
            reason: format!("character {bad:?} is not allowed"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_in_polling_mode() {
        let config = BotConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap();

        assert_eq!(config.chat.model, DEFAULT_CHAT_MODEL);
        assert_eq!(config.chat.base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(config.chat.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert!(config.webhook.is_none());
        assert!(config.sessions.idle_ttl().is_none());
        assert!(config.persona.is_none());
        assert!(config.catalog_path.is_none());
    }

    #[test]
    fn test_missing_credentials() {
        let err = BotConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("TELEGRAM_BOT_TOKEN"));

        let err = BotConfig::from_lookup(lookup(&[("TELEGRAM_BOT_TOKEN", "123:abc")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("OPENAI_API_KEY"));
    }

    #[test]
    fn test_webhook_mode_requires_secret() {
        let err = BotConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("OPENAI_API_KEY", "sk-test"),
            ("WEBHOOK_PUBLIC_URL", "https://bot.example.com"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("TELEGRAM_WEBHOOK_SECRET"));
    }

    #[test]
    fn test_webhook_mode() {
        let config = BotConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("OPENAI_API_KEY", "sk-test"),
            ("WEBHOOK_PUBLIC_URL", "https://bot.example.com/"),
            ("TELEGRAM_WEBHOOK_SECRET", "s3cr3t_token-1"),
            ("SESSION_IDLE_TTL_SECS", "3600"),
        ]))
        .unwrap();

        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.url.as_str(), "https://bot.example.com/telegram");
        assert_eq!(webhook.listen_addr, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.sessions.idle_ttl(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = BotConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "OPENAI_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn test_webhook_secret_validation() {
        assert!(validate_webhook_secret("abc_DEF-123").is_ok());
        assert!(validate_webhook_secret("").is_err());
        assert!(validate_webhook_secret("has space").is_err());
        assert!(validate_webhook_secret("semi;colon").is_err());
        assert!(validate_webhook_secret(&"a".repeat(257)).is_err());
        assert!(validate_webhook_secret(&"a".repeat(256)).is_ok());
    }

    #[test]
    fn test_zero_sweep_interval_is_rejected() {
        let err = BotConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("OPENAI_API_KEY", "sk-test"),
            ("SESSION_IDLE_TTL_SECS", "60"),
            ("SESSION_SWEEP_INTERVAL_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "SESSION_SWEEP_INTERVAL_SECS", .. }
        ));

        let config = BotConfig::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("OPENAI_API_KEY", "sk-test"),
            ("SESSION_SWEEP_INTERVAL_SECS", "30"),
            ("CATALOG_PATH", "catalog.json"),
        ]))
        .unwrap();
        assert_eq!(config.sessions.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.catalog_path, Some(PathBuf::from("catalog.json")));
    }
}
