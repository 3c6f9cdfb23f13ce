/// Token-based registration and sign-in flows
///
/// Handles pending request creation for both flows, the single-use token
/// verification protocol, and expiry cleanup.

mod manager;

pub use manager::{AuthRequestManager, VerifiedRequest, REAPER_BATCH_SIZE};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRegistrationRequest {
    pub email: String,
    pub name: String,
    pub continue_url: String,
}

/// Sign-in request for an existing user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignInRequest {
    pub email: String,
    pub continue_url: String,
}

/// Response for both create endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token verification request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyTokenRequest {
    pub token: String,
}

/// Token verification response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTokenResponse {
    pub success: bool,
    pub email: String,
    pub name: Option<String>,
    pub continue_url: String,
}

/// Response of the expiry sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}
