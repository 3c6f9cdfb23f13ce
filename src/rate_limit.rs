/// Rate limiting for the public auth endpoints
///
/// Every endpoint here is unauthenticated and reachable with nothing but an
/// email address, so a single in-process limiter guards the whole surface.
use crate::error::{AuthError, AuthResult};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

/// Rate limiter options
#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    pub enabled: bool,
    /// Requests per second across the auth surface
    pub requests_per_second: u32,
    /// Burst size
    pub burst_size: u32,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10,
            burst_size: 30,
        }
    }
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    limiter: Arc<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimiter {
    pub fn new(options: RateLimitOptions) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(options.requests_per_second).unwrap_or(NonZeroU32::new(10).unwrap()),
        )
        .allow_burst(NonZeroU32::new(options.burst_size).unwrap_or(NonZeroU32::new(30).unwrap()));

        Self {
            enabled: options.enabled,
            limiter: Arc::new(GovernorLimiter::direct(quota)),
        }
    }

    /// Check the shared quota
    pub fn check(&self) -> AuthResult<()> {
        if !self.enabled {
            return Ok(());
        }

        match self.limiter.check() {
            Ok(_) => Ok(()),
            Err(_) => Err(AuthError::RateLimitExceeded {
                retry_after: std::time::Duration::from_secs(1),
            }),
        }
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    match ctx.rate_limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => Err(StatusCode::TOO_MANY_REQUESTS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_limit() {
        let limiter = RateLimiter::new(RateLimitOptions {
            enabled: true,
            requests_per_second: 5,
            burst_size: 5,
        });

        // Should allow burst requests
        for _ in 0..5 {
            assert!(limiter.check().is_ok());
        }

        // Should hit rate limit after burst
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_disabled_limiter_never_rejects() {
        let limiter = RateLimiter::new(RateLimitOptions {
            enabled: false,
            requests_per_second: 1,
            burst_size: 1,
        });

        for _ in 0..100 {
            assert!(limiter.check().is_ok());
        }
    }
}
