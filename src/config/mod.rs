//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,
    /// Engine timing for every room this server hosts
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = EngineConfig::server();
        let engine = EngineConfig {
            partial_sync_every: parse_or("PARTIAL_SYNC_TICKS", defaults.partial_sync_every)?,
            snapshot_every: parse_or("SERVER_SNAPSHOT_TICKS", defaults.snapshot_every)?,
            retention_ticks: parse_or("RETENTION_TICKS", defaults.retention_ticks)?,
            gc_every: defaults.gc_every,
        };
        if engine.partial_sync_every == 0 || engine.snapshot_every == 0 {
            return Err(ConfigError::Invalid("tick intervals must be positive"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")),

            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            engine,
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Timing of one engine instance, in ticks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Periodic partial sync interval (server)
    pub partial_sync_every: u64,
    /// Snapshot interval
    pub snapshot_every: u64,
    /// How far back history is kept (server)
    pub retention_ticks: u64,
    /// Garbage collection interval
    pub gc_every: u64,
}

impl EngineConfig {
    pub fn server() -> Self {
        Self {
            partial_sync_every: 60,
            snapshot_every: 6,
            retention_ticks: 3_600,
            gc_every: 3_600,
        }
    }

    /// Clients snapshot every tick so any sync can be rewound exactly
    pub fn client() -> Self {
        Self {
            partial_sync_every: 60,
            snapshot_every: 1,
            retention_ticks: 3_600,
            gc_every: 300,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_and_client_differ_in_history_density() {
        let server = EngineConfig::server();
        let client = EngineConfig::client();
        assert_eq!(server.snapshot_every, 6);
        assert_eq!(client.snapshot_every, 1);
        assert_eq!(client.gc_every, 300);
        assert_eq!(server.partial_sync_every, client.partial_sync_every);
    }
}
