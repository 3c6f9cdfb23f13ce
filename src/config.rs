/// Configuration management for the Atelier auth service
use crate::error::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub tokens: TokenConfig,
    pub email: Option<EmailConfig>,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub auth_db: PathBuf,
}

/// Token and session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// HS256 secret for minted session tokens
    pub session_secret: String,
    /// Minted session lifetime in seconds
    pub session_ttl_secs: i64,
    /// Origins a continueUrl may point at; empty list allows any origin
    pub allowed_continue_origins: Vec<String>,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AuthResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("ATELIER_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("ATELIER_PORT")
            .unwrap_or_else(|_| "8585".to_string())
            .parse()
            .map_err(|_| AuthError::Validation("Invalid port number".to_string()))?;
        let version = env::var("ATELIER_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("ATELIER_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let auth_db = env::var("ATELIER_AUTH_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("auth.sqlite"));

        let session_secret = env::var("ATELIER_SESSION_SECRET")
            .map_err(|_| AuthError::Validation("Session secret required".to_string()))?;
        let session_ttl_secs = env::var("ATELIER_SESSION_TTL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3600);

        // Parse allowed continueUrl origins from comma-separated list
        let allowed_continue_origins = env::var("ATELIER_ALLOWED_CONTINUE_ORIGINS")
            .unwrap_or_else(|_| String::new())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<String>>();

        let email = if let Ok(smtp_url) = env::var("ATELIER_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("ATELIER_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let rate_limit_enabled = env::var("ATELIER_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let requests_per_second = env::var("ATELIER_RATE_LIMIT_PER_SECOND")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let burst_size = env::var("ATELIER_RATE_LIMIT_BURST")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                auth_db,
            },
            tokens: TokenConfig {
                session_secret,
                session_ttl_secs,
                allowed_continue_origins,
            },
            email,
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
                requests_per_second,
                burst_size,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AuthResult<()> {
        if self.service.hostname.is_empty() {
            return Err(AuthError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.tokens.session_secret.len() < 32 {
            return Err(AuthError::Validation(
                "Session secret must be at least 32 characters".to_string(),
            ));
        }

        if self.tokens.session_ttl_secs <= 0 {
            return Err(AuthError::Validation(
                "Session TTL must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
