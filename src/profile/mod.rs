/// Application user profiles
///
/// The auth core creates or touches these records only as a side effect of
/// successful token verification; everything else about the profile lifecycle
/// belongs to the application.
use crate::{
    clock::Clock,
    db::records::AppUserProfile,
    error::{AuthError, AuthResult},
};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// Profile store service
pub struct ProfileManager {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl ProfileManager {
    /// Create a new profile manager
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Insert a profile if none exists for the email
    ///
    /// The unique email constraint is the authoritative duplicate-account
    /// gate: two racing registrations collapse onto whichever row landed
    /// first, and the loser's insert is a no-op.
    pub async fn ensure_profile(&self, email: &str, name: &str) -> AuthResult<AppUserProfile> {
        let now = self.clock.now();
        let user_id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO app_user_profile (user_id, email, name, created_at, login_count)
            VALUES (?1, ?2, ?3, ?4, 0)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(&user_id)
        .bind(email)
        .bind(name)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::Internal("Profile row missing after insert".to_string()))
    }

    /// Record a successful login on an existing profile
    pub async fn record_login(
        &self,
        email: &str,
        requester_ip: Option<&str>,
    ) -> AuthResult<AppUserProfile> {
        let now = self.clock.now();

        let result = sqlx::query(
            r#"
            UPDATE app_user_profile
            SET last_login_at = ?1, login_count = login_count + 1, last_login_ip = ?2
            WHERE email = ?3
            "#,
        )
        .bind(now)
        .bind(requester_ip)
        .bind(email)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }

        self.find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::Internal("Profile row missing after update".to_string()))
    }

    /// Look up a profile by normalized email
    pub async fn find_by_email(&self, email: &str) -> AuthResult<Option<AppUserProfile>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, email, name, created_at, last_login_at, login_count, last_login_ip
            FROM app_user_profile WHERE email = ?1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(AppUserProfile {
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
            last_login_at: row.try_get("last_login_at")?,
            login_count: row.try_get("login_count")?,
            last_login_ip: row.try_get("last_login_ip")?,
        }))
    }
}
