use std::{env, fmt::Display, str::FromStr};

use axum::http::HeaderValue;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where comments and likes live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreUrl {
    Redis(String),
    Sqlite(String),
}

impl FromStr for StoreUrl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() {
            return Err("empty store location".to_string());
        }

        if s.starts_with("redis://") || s.starts_with("rediss://") {
            Ok(StoreUrl::Redis(s.to_string()))
        } else {
            Ok(StoreUrl::Sqlite(
                s.strip_prefix("sqlite://").unwrap_or(s).to_string(),
            ))
        }
    }
}

/// Read once at startup; never mutated afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub store_url: StoreUrl,
    pub allowed_origin: HeaderValue,
    pub client_ip_header: String,
    pub comments_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            store_url: try_load("STORE_URL", "comments.db")?,
            allowed_origin: try_load("ALLOWED_ORIGIN", "https://worldoftech.qzz.io")?,
            client_ip_header: try_load("CLIENT_IP_HEADER", "CF-Connecting-IP")?,
            comments_limit: try_load("COMMENTS_LIMIT", "50")?,
        })
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");

        ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }
    })
}
