//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Ledger database endpoints, tried in order at store bootstrap.
    pub database_urls: Vec<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Environment (development, production)
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `DATABASE_URL` may carry a comma-separated endpoint list; the store
    /// connects to the first endpoint that answers.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_urls =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_urls: Vec<String> = raw_urls
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if database_urls.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL"));
        }

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Ok(Self {
            database_urls,
            database_max_connections,
            environment,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
