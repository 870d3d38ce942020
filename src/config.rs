// src/config.rs
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::text_record::{self, DEFAULT_LANGUAGE, EncodeError};

pub const ENV_BIND: &str = "NFC_TEXT_BIND";
pub const ENV_LANGUAGE: &str = "NFC_TEXT_LANGUAGE";
pub const ENV_WRITE_PREFIX: &str = "NFC_TEXT_WRITE_PREFIX";
pub const ENV_POLL_MS: &str = "NFC_TEXT_POLL_MS";
pub const ENV_LOG: &str = "NFC_TEXT_LOG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("NFC_TEXT_BIND: invalid socket address {0:?}")]
    BindAddr(String),
    #[error("NFC_TEXT_POLL_MS: invalid millisecond value {0:?}")]
    PollInterval(String),
    #[error("NFC_TEXT_LANGUAGE: {0}")]
    Language(#[from] EncodeError),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub language: String,
    pub write_prefix: String,
    pub poll_interval_ms: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3500)),
            language: DEFAULT_LANGUAGE.to_string(),
            write_prefix: String::new(),
            poll_interval_ms: 500,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(raw) = lookup(ENV_BIND) {
            config.bind_addr = raw.parse().map_err(|_| ConfigError::BindAddr(raw))?;
        }
        if let Some(language) = lookup(ENV_LANGUAGE) {
            text_record::validate_language(&language)?;
            config.language = language;
        }
        if let Some(prefix) = lookup(ENV_WRITE_PREFIX) {
            config.write_prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_POLL_MS) {
            config.poll_interval_ms = match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => return Err(ConfigError::PollInterval(raw)),
            };
        }
        if let Some(level) = lookup(ENV_LOG) {
            config.log_level = level;
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Text as it goes onto the tag.
    pub fn tag_text(&self, text: &str) -> String {
        format!("{}{}", self.write_prefix, text)
    }
}
