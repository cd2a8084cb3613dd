use std::env;
use std::net::{AddrParseError, SocketAddr};

use thiserror::Error;

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub bind_addr: SocketAddr,
    pub db_url: Option<String>,
    pub identity_base_url: Option<String>,
    pub identity_timeout_ms: u64,
    pub generation_webhook_url: Option<String>,
    pub generation_timeout_ms: u64,
    pub purchase_webhook_url: Option<String>,
    pub purchase_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PLANNER_BIND_ADDR: {0}")]
    InvalidBindAddr(#[from] AddrParseError),
    #[error("invalid {key}: {reason}")]
    InvalidTimeout { key: &'static str, reason: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("PLANNER_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:4300".to_string())
            .parse()?;
        let service_name =
            env::var("PLANNER_SERVICE_NAME").unwrap_or_else(|_| "planner".to_string());
        let db_url = env::var("DB_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let optional_url = |key: &str| -> Option<String> {
            env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let parse_timeout = |key: &'static str, default: &str| -> Result<u64, ConfigError> {
            env::var(key)
                .unwrap_or_else(|_| default.to_string())
                .parse::<u64>()
                .map_err(|error| ConfigError::InvalidTimeout {
                    key,
                    reason: error.to_string(),
                })
        };

        Ok(Self {
            service_name,
            bind_addr,
            db_url,
            identity_base_url: optional_url("PLANNER_IDENTITY_BASE_URL"),
            identity_timeout_ms: parse_timeout("PLANNER_IDENTITY_TIMEOUT_MS", "5000")?,
            generation_webhook_url: optional_url("PLANNER_GENERATION_WEBHOOK_URL"),
            generation_timeout_ms: parse_timeout("PLANNER_GENERATION_TIMEOUT_MS", "60000")?,
            purchase_webhook_url: optional_url("PLANNER_PURCHASE_WEBHOOK_URL"),
            purchase_timeout_ms: parse_timeout("PLANNER_PURCHASE_TIMEOUT_MS", "10000")?,
        })
    }
}
