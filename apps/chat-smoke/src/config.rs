//! Environment-backed configuration for `chat-smoke`.

use std::{env, error::Error, fmt, path::PathBuf};

use chat_core::ChatOptions;

const DEFAULT_STORE_PATH: &str = "./.waku-chat-store/identity.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// Options handed to every chat session.
    pub options: ChatOptions,
    /// JSON file holding the persisted local identity.
    pub store_path: PathBuf,
}

impl SmokeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = ChatOptions::default();

        let channel_name = optional_trimmed_env("WAKU_CHAT_CHANNEL", &mut lookup)
            .unwrap_or(defaults.channel_name);
        let peers = parse_list("WAKU_CHAT_PEERS", &mut lookup);
        let rooms = parse_list("WAKU_CHAT_ROOMS", &mut lookup);

        let options = ChatOptions {
            channel_name,
            peers,
            rooms,
            allow_private_chat: parse_bool(
                "WAKU_CHAT_ALLOW_PRIVATE",
                defaults.allow_private_chat,
                &mut lookup,
            )?,
            initial_fetch_limit: parse_positive_u32(
                "WAKU_CHAT_INITIAL_FETCH_LIMIT",
                defaults.initial_fetch_limit,
                &mut lookup,
            )?,
            fetch_limit: parse_positive_u32(
                "WAKU_CHAT_FETCH_LIMIT",
                defaults.fetch_limit,
                &mut lookup,
            )?,
            max_messages: parse_optional_u64("WAKU_CHAT_MAX_MESSAGES", &mut lookup)?
                .map(|value| value as usize),
            message_age_window_ms: parse_optional_u64("WAKU_CHAT_MESSAGE_AGE_MS", &mut lookup)?,
            max_fetch_attempts: parse_positive_u32(
                "WAKU_CHAT_MAX_FETCH_ATTEMPTS",
                defaults.max_fetch_attempts,
                &mut lookup,
            )?,
            fetch_pause_ms: parse_optional_u64("WAKU_CHAT_FETCH_PAUSE_MS", &mut lookup)?
                .unwrap_or(defaults.fetch_pause_ms),
            fetch_on_scroll: parse_bool(
                "WAKU_CHAT_FETCH_ON_SCROLL",
                defaults.fetch_on_scroll,
                &mut lookup,
            )?,
            show_system_messages: parse_bool(
                "WAKU_CHAT_SHOW_SYSTEM",
                defaults.show_system_messages,
                &mut lookup,
            )?,
            allow_rename: parse_bool("WAKU_CHAT_ALLOW_RENAME", defaults.allow_rename, &mut lookup)?,
        };

        if options.max_messages == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "WAKU_CHAT_MAX_MESSAGES",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let store_path = optional_trimmed_env("WAKU_CHAT_STORE_PATH", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));

        Ok(Self {
            options,
            store_path,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_list<F>(key: &'static str, lookup: &mut F) -> Vec<String>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_positive_u32<F>(key: &'static str, default: u32, lookup: &mut F) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    match value.parse::<u32>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be at least 1".to_owned(),
        }),
        Ok(parsed) => Ok(parsed),
        Err(err) => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        }),
    }
}

fn parse_bool<F>(key: &'static str, default: bool, lookup: &mut F) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected true or false".to_owned(),
        }),
    }
}
