/// Pending auth request manager
///
/// Owns the pending_auth_request table: record creation for both flows, the
/// single-use verify transition, and the expiry sweep. Every state transition
/// is a conditional update against the store, never a plain read-then-write,
/// so concurrent verifies of one token (or a verify racing the reaper) can
/// never both succeed.

use crate::{
    clock::Clock,
    db::records::{PendingAuthRequest, RequestKind, RequestStatus},
    error::{AuthError, AuthResult},
    token::generate_token,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use validator::ValidateEmail;

/// Fixed record lifetime
const REQUEST_TTL_HOURS: i64 = 24;

/// Upper bound on display names
const MAX_NAME_LENGTH: usize = 100;

/// Rows deleted per reaper statement, kept under typical per-transaction
/// operation limits
pub const REAPER_BATCH_SIZE: i64 = 450;

/// Data handed back by a successful verification
#[derive(Debug, Clone)]
pub struct VerifiedRequest {
    pub email: String,
    pub display_name: Option<String>,
    pub continue_url: String,
    pub kind: RequestKind,
    pub verified_at: DateTime<Utc>,
}

/// Auth request manager service
pub struct AuthRequestManager {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    allowed_continue_origins: Vec<String>,
}

impl AuthRequestManager {
    /// Create a new auth request manager
    pub fn new(
        db: SqlitePool,
        clock: Arc<dyn Clock>,
        allowed_continue_origins: Vec<String>,
    ) -> Self {
        Self {
            db,
            clock,
            allowed_continue_origins,
        }
    }

    /// Create a pending registration request
    ///
    /// Fails with UserExists when a profile already exists for the email. The
    /// check is advisory under concurrent registration; the profile table's
    /// unique email constraint remains the authoritative arbiter.
    pub async fn create_registration(
        &self,
        email: &str,
        name: &str,
        continue_url: &str,
    ) -> AuthResult<PendingAuthRequest> {
        let email = normalize_email(email);
        self.validate_email(&email)?;
        self.validate_name(name)?;
        self.validate_continue_url(continue_url)?;

        if self.profile_exists(&email).await? {
            return Err(AuthError::UserExists);
        }

        let record = self
            .insert_request(
                RequestKind::Registration,
                &email,
                Some(name.trim().to_string()),
                continue_url,
            )
            .await?;

        tracing::info!(email = %record.email, "Created registration request");

        Ok(record)
    }

    /// Create a pending sign-in request for an existing user
    ///
    /// The display name is read back from the profile, never taken from the
    /// caller, so a sign-in request cannot rename another user.
    pub async fn create_sign_in(
        &self,
        email: &str,
        continue_url: &str,
    ) -> AuthResult<PendingAuthRequest> {
        let email = normalize_email(email);
        self.validate_email(&email)?;
        self.validate_continue_url(continue_url)?;

        let row = sqlx::query("SELECT name FROM app_user_profile WHERE email = ?1")
            .bind(&email)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let name: String = row.try_get("name")?;

        let record = self
            .insert_request(RequestKind::SignIn, &email, Some(name), continue_url)
            .await?;

        tracing::info!(email = %record.email, "Created sign-in request");

        Ok(record)
    }

    /// Consume a token
    ///
    /// The success path is a single conditional update; of any number of
    /// concurrent calls for one token, at most one can observe an affected
    /// row. A token presented to the wrong flow's endpoint is reported as
    /// InvalidToken and is not consumed.
    pub async fn verify(
        &self,
        token: &str,
        expected_kind: RequestKind,
        requester_ip: Option<&str>,
    ) -> AuthResult<VerifiedRequest> {
        let now = self.clock.now();

        let result = sqlx::query(
            r#"
            UPDATE pending_auth_request
            SET status = 'completed', verified_at = ?1, requester_ip = ?2
            WHERE token = ?3 AND kind = ?4 AND status = 'pending' AND expires_at > ?1
            "#,
        )
        .bind(now)
        .bind(requester_ip)
        .bind(token)
        .bind(expected_kind.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.classify_failed_verify(token, expected_kind, now).await?);
        }

        let row = sqlx::query(
            "SELECT email, display_name, continue_url FROM pending_auth_request WHERE token = ?1",
        )
        .bind(token)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(kind = expected_kind.as_str(), "Auth token verified");

        Ok(VerifiedRequest {
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            continue_url: row.try_get("continue_url")?,
            kind: expected_kind,
            verified_at: now,
        })
    }

    /// Work out which failure a zero-row verify update maps to
    async fn classify_failed_verify(
        &self,
        token: &str,
        expected_kind: RequestKind,
        now: DateTime<Utc>,
    ) -> AuthResult<AuthError> {
        let row = sqlx::query(
            "SELECT kind, status, expires_at FROM pending_auth_request WHERE token = ?1",
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            // Unknown token, or the reaper deleted the record before our
            // update could claim it.
            return Ok(AuthError::InvalidToken);
        };

        let kind: String = row.try_get("kind")?;
        if RequestKind::parse(&kind) != Some(expected_kind) {
            return Ok(AuthError::InvalidToken);
        }

        let status: String = row.try_get("status")?;
        match RequestStatus::parse(&status) {
            Some(RequestStatus::Completed) => Ok(AuthError::TokenAlreadyUsed),
            Some(RequestStatus::Expired) => Ok(AuthError::TokenExpired),
            Some(RequestStatus::Pending) => {
                let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
                if now < expires_at {
                    // Still pending and unexpired here means the record
                    // flipped between our update and this read; whoever
                    // flipped it consumed the token.
                    Ok(AuthError::TokenAlreadyUsed)
                } else {
                    // Lazy expiry: mark the record before reporting, unless a
                    // concurrent transition got there first.
                    sqlx::query(
                        "UPDATE pending_auth_request SET status = 'expired' WHERE token = ?1 AND status = 'pending'",
                    )
                    .bind(token)
                    .execute(&self.db)
                    .await?;
                    Ok(AuthError::TokenExpired)
                }
            }
            None => Ok(AuthError::Internal(format!(
                "Unknown request status: {}",
                status
            ))),
        }
    }

    /// Batched sweep of expired records
    ///
    /// Deletes any record past its expiry regardless of status: lazily
    /// expired records are terminal and completed records past the window are
    /// dead weight. Each batch is one atomic statement, all-or-nothing.
    pub async fn cleanup_expired(&self) -> AuthResult<u64> {
        let now = self.clock.now();
        let mut deleted = 0u64;

        loop {
            let result = sqlx::query(
                r#"
                DELETE FROM pending_auth_request
                WHERE token IN (
                    SELECT token FROM pending_auth_request
                    WHERE expires_at < ?1
                    LIMIT ?2
                )
                "#,
            )
            .bind(now)
            .bind(REAPER_BATCH_SIZE)
            .execute(&self.db)
            .await?;

            let batch = result.rows_affected();
            deleted += batch;
            if batch < REAPER_BATCH_SIZE as u64 {
                break;
            }
        }

        if deleted > 0 {
            tracing::info!(deleted, "Reaped expired auth requests");
        } else {
            tracing::debug!("Auth request cleanup: nothing expired");
        }

        Ok(deleted)
    }

    /// Fetch a request by token (diagnostics and tests)
    pub async fn get_request(&self, token: &str) -> AuthResult<Option<PendingAuthRequest>> {
        let row = sqlx::query(
            r#"
            SELECT token, email, display_name, continue_url, kind, status,
                   created_at, expires_at, verified_at, requester_ip
            FROM pending_auth_request WHERE token = ?1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let kind_str: String = row.try_get("kind")?;
        let status_str: String = row.try_get("status")?;
        let kind = RequestKind::parse(&kind_str)
            .ok_or_else(|| AuthError::Internal(format!("Unknown request kind: {}", kind_str)))?;
        let status = RequestStatus::parse(&status_str)
            .ok_or_else(|| AuthError::Internal(format!("Unknown request status: {}", status_str)))?;

        Ok(Some(PendingAuthRequest {
            token: row.try_get("token")?,
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            continue_url: row.try_get("continue_url")?,
            kind,
            status,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            verified_at: row.try_get("verified_at")?,
            requester_ip: row.try_get("requester_ip")?,
        }))
    }

    /// Insert a fresh pending record
    async fn insert_request(
        &self,
        kind: RequestKind,
        email: &str,
        display_name: Option<String>,
        continue_url: &str,
    ) -> AuthResult<PendingAuthRequest> {
        let token = generate_token();
        let now = self.clock.now();
        let expires_at = now + Duration::hours(REQUEST_TTL_HOURS);

        sqlx::query(
            r#"
            INSERT INTO pending_auth_request
                (token, email, display_name, continue_url, kind, status, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&token)
        .bind(email)
        .bind(&display_name)
        .bind(continue_url)
        .bind(kind.as_str())
        .bind(RequestStatus::Pending.as_str())
        .bind(now)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(PendingAuthRequest {
            token,
            email: email.to_string(),
            display_name,
            continue_url: continue_url.to_string(),
            kind,
            status: RequestStatus::Pending,
            created_at: now,
            expires_at,
            verified_at: None,
            requester_ip: None,
        })
    }

    /// Check if a profile exists for an email
    async fn profile_exists(&self, email: &str) -> AuthResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM app_user_profile WHERE email = ?1")
                .bind(email)
                .fetch_one(&self.db)
                .await?;

        Ok(count > 0)
    }

    fn validate_email(&self, email: &str) -> AuthResult<()> {
        if !email.validate_email() {
            return Err(AuthError::Validation(format!(
                "Invalid email address: {}",
                email
            )));
        }
        Ok(())
    }

    fn validate_name(&self, name: &str) -> AuthResult<()> {
        if name.trim().is_empty() {
            return Err(AuthError::Validation("Name cannot be empty".to_string()));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(AuthError::Validation(format!(
                "Name exceeds maximum length of {} characters",
                MAX_NAME_LENGTH
            )));
        }
        Ok(())
    }

    fn validate_continue_url(&self, continue_url: &str) -> AuthResult<()> {
        if continue_url.is_empty() {
            return Err(AuthError::Validation(
                "continueUrl cannot be empty".to_string(),
            ));
        }
        if !continue_url.starts_with("https://") && !continue_url.starts_with("http://") {
            return Err(AuthError::Validation(
                "continueUrl must be an absolute http(s) URL".to_string(),
            ));
        }

        // Empty allow-list keeps the origin unconstrained
        if self.allowed_continue_origins.is_empty() {
            return Ok(());
        }

        let origin = url_origin(continue_url);
        if self
            .allowed_continue_origins
            .iter()
            .any(|allowed| allowed.trim_end_matches('/') == origin)
        {
            Ok(())
        } else {
            Err(AuthError::Validation(format!(
                "continueUrl origin {} is not allowed",
                origin
            )))
        }
    }
}

/// Scheme and authority of an absolute URL, without path, query, or fragment
fn url_origin(url: &str) -> &str {
    let after_scheme = match url.find("://") {
        Some(idx) => idx + 3,
        None => return url,
    };
    let end = url[after_scheme..]
        .find(['/', '?', '#'])
        .map(|idx| after_scheme + idx)
        .unwrap_or(url.len());
    &url[..end]
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test::ManualClock;
    use crate::db;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool, Arc<ManualClock>, AuthRequestManager) {
        setup_with_origins(Vec::new()).await
    }

    async fn setup_with_origins(
        origins: Vec<String>,
    ) -> (TempDir, SqlitePool, Arc<ManualClock>, AuthRequestManager) {
        let dir = TempDir::new().unwrap();
        let pool = db::create_pool(&dir.path().join("auth.sqlite"), db::DatabaseOptions::default())
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let manager = AuthRequestManager::new(pool.clone(), clock.clone(), origins);

        (dir, pool, clock, manager)
    }

    async fn seed_profile(pool: &SqlitePool, email: &str, name: &str) {
        sqlx::query(
            "INSERT INTO app_user_profile (user_id, email, name, created_at, login_count)
             VALUES (?1, ?2, ?3, ?4, 0)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(email)
        .bind(name)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn pending_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM pending_auth_request")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_registration_round_trip() {
        let (_dir, _pool, _clock, manager) = setup().await;

        let record = manager
            .create_registration("a@b.com", "Ana", "https://x/y")
            .await
            .unwrap();
        assert_eq!(record.status, RequestStatus::Pending);
        assert_eq!(record.expires_at, record.created_at + Duration::hours(24));

        let verified = manager
            .verify(&record.token, RequestKind::Registration, None)
            .await
            .unwrap();
        assert_eq!(verified.email, "a@b.com");
        assert_eq!(verified.display_name.as_deref(), Some("Ana"));
        assert_eq!(verified.continue_url, "https://x/y");

        let stored = manager.get_request(&record.token).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
        assert!(stored.verified_at.is_some());
    }

    #[tokio::test]
    async fn test_second_verify_returns_already_used() {
        let (_dir, _pool, _clock, manager) = setup().await;

        let record = manager
            .create_registration("alice@example.com", "Alice", "https://app.example/welcome")
            .await
            .unwrap();

        // The name comes back preserved, not re-derived
        let verified = manager
            .verify(&record.token, RequestKind::Registration, None)
            .await
            .unwrap();
        assert_eq!(verified.display_name.as_deref(), Some("Alice"));

        let err = manager
            .verify(&record.token, RequestKind::Registration, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenAlreadyUsed));
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let (_dir, _pool, _clock, manager) = setup().await;

        let err = manager
            .verify("no-such-token", RequestKind::Registration, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_expired_token_transitions_lazily() {
        let (_dir, _pool, clock, manager) = setup().await;

        let record = manager
            .create_registration("a@b.com", "Ana", "https://x/y")
            .await
            .unwrap();

        clock.advance(Duration::hours(24) + Duration::seconds(1));

        let err = manager
            .verify(&record.token, RequestKind::Registration, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));

        // The failed verify marked the record expired as a side effect
        let stored = manager.get_request(&record.token).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Expired);
        assert!(stored.verified_at.is_none());

        // Expired is terminal
        let err = manager
            .verify(&record.token, RequestKind::Registration, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn test_verify_at_exact_expiry_fails() {
        let (_dir, _pool, clock, manager) = setup().await;

        let record = manager
            .create_registration("a@b.com", "Ana", "https://x/y")
            .await
            .unwrap();

        clock.advance(Duration::hours(24));

        let err = manager
            .verify(&record.token, RequestKind::Registration, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected_without_record() {
        let (_dir, pool, _clock, manager) = setup().await;
        seed_profile(&pool, "taken@example.com", "Existing").await;

        let err = manager
            .create_registration("taken@example.com", "Impostor", "https://x/y")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserExists));
        assert_eq!(pending_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_sign_in_for_unknown_user_rejected_without_record() {
        let (_dir, pool, _clock, manager) = setup().await;

        let err = manager
            .create_sign_in("nobody@x.com", "https://x/y")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
        assert_eq!(pending_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_sign_in_name_read_back_from_profile() {
        let (_dir, pool, _clock, manager) = setup().await;
        seed_profile(&pool, "opal@example.com", "Opal").await;

        let record = manager
            .create_sign_in("opal@example.com", "https://x/y")
            .await
            .unwrap();
        assert_eq!(record.kind, RequestKind::SignIn);
        assert_eq!(record.display_name.as_deref(), Some("Opal"));
    }

    #[tokio::test]
    async fn test_wrong_kind_is_invalid_and_not_consumed() {
        let (_dir, _pool, _clock, manager) = setup().await;

        let record = manager
            .create_registration("a@b.com", "Ana", "https://x/y")
            .await
            .unwrap();

        let err = manager
            .verify(&record.token, RequestKind::SignIn, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));

        // The mismatch did not burn the token
        manager
            .verify(&record.token, RequestKind::Registration, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_requester_ip_recorded_but_not_authorizing() {
        let (_dir, _pool, _clock, manager) = setup().await;

        // Created from one device, verified from another address entirely
        let record = manager
            .create_registration("a@b.com", "Ana", "https://x/y")
            .await
            .unwrap();

        manager
            .verify(&record.token, RequestKind::Registration, Some("203.0.113.7"))
            .await
            .unwrap();

        let stored = manager.get_request(&record.token).await.unwrap().unwrap();
        assert_eq!(stored.requester_ip.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_concurrent_verify_has_single_winner() {
        let (_dir, _pool, _clock, manager) = setup().await;
        let manager = Arc::new(manager);

        let record = manager
            .create_registration("a@b.com", "Ana", "https://x/y")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let token = record.token.clone();
            handles.push(tokio::spawn(async move {
                manager.verify(&token, RequestKind::Registration, None).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(err, AuthError::TokenAlreadyUsed)),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (_dir, pool, clock, manager) = setup().await;

        for i in 0..3 {
            manager
                .create_registration(&format!("user{}@example.com", i), "User", "https://x/y")
                .await
                .unwrap();
        }

        clock.advance(Duration::hours(25));

        assert_eq!(manager.cleanup_expired().await.unwrap(), 3);
        assert_eq!(manager.cleanup_expired().await.unwrap(), 0);
        assert_eq!(pending_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_leaves_live_records() {
        let (_dir, pool, clock, manager) = setup().await;

        manager
            .create_registration("fresh@example.com", "Fresh", "https://x/y")
            .await
            .unwrap();

        clock.advance(Duration::hours(1));

        assert_eq!(manager.cleanup_expired().await.unwrap(), 0);
        assert_eq!(pending_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_spans_multiple_batches() {
        let (_dir, pool, clock, manager) = setup().await;

        let total = REAPER_BATCH_SIZE as usize + 7;
        for i in 0..total {
            manager
                .create_registration(&format!("bulk{}@example.com", i), "Bulk", "https://x/y")
                .await
                .unwrap();
        }

        clock.advance(Duration::hours(25));

        assert_eq!(manager.cleanup_expired().await.unwrap(), total as u64);
        assert_eq!(pending_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_email_is_normalized() {
        let (_dir, _pool, _clock, manager) = setup().await;

        let record = manager
            .create_registration("  Ana@B.COM ", "Ana", "https://x/y")
            .await
            .unwrap();
        assert_eq!(record.email, "ana@b.com");
    }

    #[tokio::test]
    async fn test_input_validation() {
        let (_dir, _pool, _clock, manager) = setup().await;

        let err = manager
            .create_registration("not-an-email", "Ana", "https://x/y")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let err = manager
            .create_registration("a@b.com", "   ", "https://x/y")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let long_name = "x".repeat(101);
        let err = manager
            .create_registration("a@b.com", &long_name, "https://x/y")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let err = manager
            .create_registration("a@b.com", "Ana", "not-a-url")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn test_continue_url_allow_list() {
        let (_dir, _pool, _clock, manager) =
            setup_with_origins(vec!["https://app.atelier.example".to_string()]).await;

        manager
            .create_registration("a@b.com", "Ana", "https://app.atelier.example/welcome")
            .await
            .unwrap();

        let err = manager
            .create_registration("b@c.com", "Bo", "https://evil.example/phish")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[test]
    fn test_url_origin() {
        assert_eq!(url_origin("https://app.example/path?q=1"), "https://app.example");
        assert_eq!(url_origin("https://app.example:8443/x"), "https://app.example:8443");
        assert_eq!(url_origin("https://app.example"), "https://app.example");
    }
}
