/// Identity-provider session capability
///
/// Verified auth requests are exchanged for a short-lived signed session
/// token. The HS256 minter here is the local stand-in for a managed identity
/// provider's custom-token exchange; deployments backed by a hosted provider
/// implement SessionIssuer against its API instead.
use crate::{
    error::{AuthError, AuthResult},
    profile::ProfileManager,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Claims carried by a minted session token
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// A live session handed to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredentials {
    pub user_id: String,
    pub email: String,
    pub session_token: String,
}

/// Capability for exchanging a verified email identity for a live session
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn issue(&self, email: &str) -> AuthResult<SessionCredentials>;
}

/// HS256 session minter
pub struct SessionMinter {
    secret: String,
    ttl_secs: i64,
}

impl SessionMinter {
    pub fn new(secret: impl Into<String>, ttl_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
        }
    }

    /// Mint a session JWT for a user
    pub fn mint(&self, user_id: &str, email: &str) -> AuthResult<String> {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(format!("Failed to mint session token: {}", e)))
    }

    /// Decode and validate a minted session token
    pub fn verify(&self, token: &str) -> AuthResult<SessionClaims> {
        use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

        let mut validation = Validation::new(Algorithm::HS256);
        // Allow some clock skew (5 minutes)
        validation.leeway = 300;

        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| AuthError::Validation(format!("Invalid session token: {}", e)))
    }
}

/// Issuer backed by the local profile store and HS256 minter
pub struct ProfileBackedIssuer {
    minter: SessionMinter,
    profiles: Arc<ProfileManager>,
}

impl ProfileBackedIssuer {
    pub fn new(minter: SessionMinter, profiles: Arc<ProfileManager>) -> Self {
        Self { minter, profiles }
    }
}

#[async_trait]
impl SessionIssuer for ProfileBackedIssuer {
    async fn issue(&self, email: &str) -> AuthResult<SessionCredentials> {
        let profile = self
            .profiles
            .find_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let session_token = self.minter.mint(&profile.user_id, &profile.email)?;

        Ok(SessionCredentials {
            user_id: profile.user_id,
            email: profile.email,
            session_token,
        })
    }
}
