//! Configuration module for the TUTasksy backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// User ids that receive the admin flag when they register
    pub admin_ids: Vec<String>,
    /// How many times a versioned write is re-attempted after losing a race
    pub max_write_retries: u32,
    /// Buffered events per change-feed subscriber
    pub feed_capacity: usize,
}

/// A malformed environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.key, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("TUTASKSY_API_PSK").ok().filter(|k| !k.is_empty());

        let db_path = env_or("TUTASKSY_DB_PATH", "./data/tutasksy.sqlite").into();
        let index_path = env_or("TUTASKSY_INDEX_PATH", "./data/index").into();

        let bind_addr = env_or("TUTASKSY_BIND_ADDR", "127.0.0.1:8080")
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError {
                key: "TUTASKSY_BIND_ADDR",
                message: e.to_string(),
            })?;

        let log_level = env_or("TUTASKSY_LOG_LEVEL", "info");

        let admin_ids = parse_id_list(&env_or("TUTASKSY_ADMIN_IDS", ""));

        let max_write_retries = env_or("TUTASKSY_MAX_WRITE_RETRIES", "5")
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError {
                key: "TUTASKSY_MAX_WRITE_RETRIES",
                message: e.to_string(),
            })?;

        let feed_capacity: usize = env_or("TUTASKSY_FEED_CAPACITY", "256")
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError {
                key: "TUTASKSY_FEED_CAPACITY",
                message: e.to_string(),
            })?;
        if feed_capacity == 0 {
            return Err(ConfigError {
                key: "TUTASKSY_FEED_CAPACITY",
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            api_psk,
            db_path,
            index_path,
            bind_addr,
            log_level,
            admin_ids,
            max_write_retries,
            feed_capacity,
        })
    }

    /// Whether a user id is configured as an administrator.
    pub fn is_admin_id(&self, user_id: &str) -> bool {
        self.admin_ids.iter().any(|id| id == user_id)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
