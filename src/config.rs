use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::{log_system_event, log_validation};

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub quiz: QuizConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

/// Tunables for quiz behaviour and moderation
#[derive(Debug, Clone, Deserialize)]
pub struct QuizConfig {
    /// Open flags needed before a published question is pulled back to draft.
    pub flag_threshold: i64,
    pub stats_cache_ttl_secs: u64,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            flag_threshold: 1,
            stats_cache_ttl_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            quiz: QuizConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    pub fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            server_address = %self.server.address(),
            request_timeout_secs = self.server.request_timeout_secs,
            log_level = %self.logging.level,
            flag_threshold = self.quiz.flag_threshold,
            stats_cache_ttl_secs = self.quiz.stats_cache_ttl_secs,
            "Configuration summary"
        );
    }

    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.server.request_timeout_secs == 0 {
            return Err(anyhow!("REQUEST_TIMEOUT_SECS must be greater than 0"));
        }

        if self.quiz.flag_threshold < 1 {
            return Err(anyhow!("FLAG_THRESHOLD must be at least 1"));
        }

        if !self.logging.console_enabled && !self.logging.file_enabled {
            warn!("Both console and file logging are disabled");
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:pathology_quiz.db".to_string());
        let max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 5)?;

        Ok(DatabaseConfig { url, max_connections })
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port = parse_env("PORT", 3000)?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let request_timeout_secs = parse_env("REQUEST_TIMEOUT_SECS", 30)?;

        Ok(ServerConfig {
            port,
            host,
            request_timeout_secs,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info,pathology_quiz=debug".to_string());
        let file_enabled = parse_env("LOG_FILE_ENABLED", true)?;
        let console_enabled = parse_env("LOG_CONSOLE_ENABLED", true)?;
        let log_directory = env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

impl QuizConfig {
    fn from_env() -> Result<Self> {
        let defaults = QuizConfig::default();

        Ok(QuizConfig {
            flag_threshold: parse_env("FLAG_THRESHOLD", defaults.flag_threshold)?,
            stats_cache_ttl_secs: parse_env("STATS_CACHE_TTL_SECS", defaults.stats_cache_ttl_secs)?,
        })
    }
}

/// Read `key` and parse it, falling back to `default` when unset.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    if data.len() <= 8 {
        "*".repeat(data.len())
    } else {
        format!("{}***{}", &data[..4], &data[data.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "sqlite:test.db".to_string(),
                max_connections: 5,
            },
            server: ServerConfig {
                port: 3000,
                host: "0.0.0.0".to_string(),
                request_timeout_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_enabled: false,
                console_enabled: true,
                log_directory: "logs".to_string(),
            },
            quiz: QuizConfig::default(),
        }
    }

    #[test]
    fn test_mask_sensitive_data() {
        assert_eq!(mask_sensitive_data("short"), "*****");
        assert_eq!(mask_sensitive_data("sqlite:pathology_quiz.db"), "sqli***z.db");
    }

    #[test]
    fn test_quiz_config_defaults() {
        let quiz = QuizConfig::default();
        assert_eq!(quiz.flag_threshold, 1);
        assert_eq!(quiz.stats_cache_ttl_secs, 300);
    }

    #[test]
    fn test_parse_env_falls_back_and_rejects_garbage() {
        unsafe { env::remove_var("PATHOLOGY_QUIZ_TEST_UNSET"); }
        assert_eq!(parse_env("PATHOLOGY_QUIZ_TEST_UNSET", 42u16).unwrap(), 42);

        unsafe { env::set_var("PATHOLOGY_QUIZ_TEST_PORT", "not-a-number"); }
        assert!(parse_env::<u16>("PATHOLOGY_QUIZ_TEST_PORT", 3000).is_err());

        unsafe { env::set_var("PATHOLOGY_QUIZ_TEST_PORT", " 8080 "); }
        assert_eq!(parse_env::<u16>("PATHOLOGY_QUIZ_TEST_PORT", 3000).unwrap(), 8080);
        unsafe { env::remove_var("PATHOLOGY_QUIZ_TEST_PORT"); }
    }

    #[test]
    fn test_config_validation() {
        let config = valid_config();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.server.port = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.quiz.flag_threshold = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.database.url = "postgres://localhost/quiz".to_string();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_server_address() {
        let config = valid_config();
        assert_eq!(config.server.address(), "0.0.0.0:3000");
        assert_eq!(config.server.request_timeout(), Duration::from_secs(30));
    }
}
