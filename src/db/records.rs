/// Database records for the auth core
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flow a pending request belongs to
///
/// Registration and sign-in share one table and one state machine; the kind
/// is the only discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Registration,
    SignIn,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Registration => "registration",
            RequestKind::SignIn => "sign_in",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "registration" => Some(RequestKind::Registration),
            "sign_in" => Some(RequestKind::SignIn),
            _ => None,
        }
    }

    /// Query parameter carrying this kind's token in a deep link
    pub fn query_param(&self) -> &'static str {
        match self {
            RequestKind::Registration => "registrationToken",
            RequestKind::SignIn => "signInToken",
        }
    }
}

/// State of a pending request
///
/// `pending` is the only non-terminal state; a record leaves it at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestStatus {
    Pending,
    Completed,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Completed => "completed",
            RequestStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RequestStatus::Pending),
            "completed" => Some(RequestStatus::Completed),
            "expired" => Some(RequestStatus::Expired),
            _ => None,
        }
    }
}

/// A registration or sign-in request awaiting token verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthRequest {
    pub token: String,
    pub email: String,
    /// Caller-supplied for registration; copied from the profile for sign-in
    pub display_name: Option<String>,
    pub continue_url: String,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Non-null iff status is completed
    pub verified_at: Option<DateTime<Utc>>,
    /// Best-effort origin of the verifying request; audit only, never
    /// authorization
    pub requester_ip: Option<String>,
}

/// Application user profile, keyed by the identity-provider user id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppUserProfile {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub login_count: i64,
    pub last_login_ip: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_storage_form() {
        for kind in [RequestKind::Registration, RequestKind::SignIn] {
            assert_eq!(RequestKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RequestKind::parse("password"), None);
    }

    #[test]
    fn test_status_round_trips_through_storage_form() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Completed,
            RequestStatus::Expired,
        ] {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::parse("revoked"), None);
    }
}
