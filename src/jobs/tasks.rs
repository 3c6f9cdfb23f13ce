/// Background task implementations
use crate::{context::AppContext, error::AuthResult};

/// Delete expired pending auth requests
pub async fn cleanup_expired_requests(ctx: &AppContext) -> AuthResult<u64> {
    ctx.request_manager.cleanup_expired().await
}

/// Health check - verify the store is reachable
pub async fn health_check(ctx: &AppContext) -> AuthResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.auth_db).await?;

    Ok(())
}
