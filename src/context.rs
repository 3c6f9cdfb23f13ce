/// Application context and dependency injection
use crate::{
    clock::{Clock, SystemClock},
    config::ServerConfig,
    db,
    error::AuthResult,
    identity::{ProfileBackedIssuer, SessionMinter},
    mailer::Mailer,
    profile::ProfileManager,
    rate_limit::{RateLimitOptions, RateLimiter},
    request::AuthRequestManager,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub auth_db: SqlitePool,
    pub request_manager: Arc<AuthRequestManager>,
    pub profile_manager: Arc<ProfileManager>,
    pub session_issuer: Arc<ProfileBackedIssuer>,
    // Rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    // Email mailer
    pub mailer: Arc<Mailer>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AuthResult<Self> {
        // Validate configuration
        config.validate()?;

        // Initialize auth database
        let auth_db = db::create_pool(&config.storage.auth_db, db::DatabaseOptions::default()).await?;

        // Run migrations
        db::run_migrations(&auth_db).await?;

        // Test connection
        db::test_connection(&auth_db).await?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // Initialize request and profile managers
        let request_manager = Arc::new(AuthRequestManager::new(
            auth_db.clone(),
            Arc::clone(&clock),
            config.tokens.allowed_continue_origins.clone(),
        ));
        let profile_manager = Arc::new(ProfileManager::new(auth_db.clone(), Arc::clone(&clock)));

        // Initialize the session capability
        let session_issuer = Arc::new(ProfileBackedIssuer::new(
            SessionMinter::new(
                config.tokens.session_secret.clone(),
                config.tokens.session_ttl_secs,
            ),
            Arc::clone(&profile_manager),
        ));

        // Initialize rate limiter
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitOptions {
            enabled: config.rate_limit.enabled,
            requests_per_second: config.rate_limit.requests_per_second,
            burst_size: config.rate_limit.burst_size,
        }));

        // Initialize mailer
        let mailer = Arc::new(Mailer::new(config.email.clone())?);

        Ok(Self {
            config: Arc::new(config),
            auth_db,
            request_manager,
            profile_manager,
            session_issuer,
            rate_limiter,
            mailer,
        })
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
