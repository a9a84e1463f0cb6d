use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::{CatalogConfig, DEFAULT_API_URL, DEFAULT_TIMEOUT};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub database_path: PathBuf,
    /// Present only when `REWARDS_API_KEY` is set
    catalog: Option<CatalogConfig>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let database_path = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("card_optimizer.db"));

        let catalog = match env::var("REWARDS_API_KEY") {
            Ok(api_key) if !api_key.trim().is_empty() => {
                let base_url =
                    env::var("REWARDS_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
                let timeout = match env::var("REWARDS_API_TIMEOUT_SECS") {
                    Ok(raw) => raw
                        .trim()
                        .parse::<u64>()
                        .ok()
                        .filter(|secs| *secs > 0)
                        .map(Duration::from_secs)
                        .ok_or(ConfigError::InvalidTimeout(raw))?,
                    Err(_) => DEFAULT_TIMEOUT,
                };

                Some(CatalogConfig {
                    base_url,
                    api_key: api_key.trim().to_string(),
                    timeout,
                })
            }
            _ => None,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                ansi: environment == AppEnvironment::Development,
            },
            database_path,
            catalog,
        })
    }

    /// Catalog settings; commands that reach the card catalog need them.
    pub fn catalog(&self) -> Result<&CatalogConfig, ConfigError> {
        self.catalog.as_ref().ok_or(ConfigError::MissingApiKey)
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Colored output, on only in development
    pub ansi: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("APP_PORT must be a valid u16")]
    InvalidPort,

    #[error("APP_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost {
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("REWARDS_API_TIMEOUT_SECS must be a positive number of seconds, got '{0}'")]
    InvalidTimeout(String),

    #[error("REWARDS_API_KEY is not set; it is required to reach the card catalog")]
    MissingApiKey,
}
