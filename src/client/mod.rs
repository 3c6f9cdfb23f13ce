/// Deep-link token handling
///
/// Bridges an inbound auth link into a live session: extracts the token from
/// the entry URL, calls the matching verify endpoint, exchanges the verified
/// identity for a session, and strips the token from the URL so history,
/// referrers, and widget rebuilds cannot replay it.
use crate::{
    db::records::RequestKind,
    error::ErrorResponse,
    identity::{SessionCredentials, SessionIssuer},
    request::{VerifyTokenRequest, VerifyTokenResponse},
};
use std::sync::Arc;

/// Token found in an entry URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkToken {
    pub kind: RequestKind,
    pub token: String,
}

/// Extract a registration or sign-in token from an entry URL
pub fn extract_token(url: &str) -> Option<DeepLinkToken> {
    let query = url.splitn(2, '?').nth(1)?;
    let query = query.split('#').next().unwrap_or(query);

    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");

        let kind = match key {
            "registrationToken" => RequestKind::Registration,
            "signInToken" => RequestKind::SignIn,
            _ => continue,
        };
        if value.is_empty() {
            continue;
        }

        let token = urlencoding::decode(value)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| value.to_string());

        return Some(DeepLinkToken { kind, token });
    }

    None
}

/// Remove auth token parameters from a URL
///
/// The cleaned URL is safe for browser history and referrer headers.
pub fn strip_token(url: &str) -> String {
    let (base, rest) = match url.split_once('?') {
        Some((base, rest)) => (base, rest),
        None => return url.to_string(),
    };
    let (query, fragment) = match rest.split_once('#') {
        Some((query, fragment)) => (query, Some(fragment)),
        None => (rest, None),
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.splitn(2, '=').next().unwrap_or("");
            key != "registrationToken" && key != "signInToken"
        })
        .filter(|pair| !pair.is_empty())
        .collect();

    let mut cleaned = base.to_string();
    if !kept.is_empty() {
        cleaned.push('?');
        cleaned.push_str(&kept.join("&"));
    }
    if let Some(fragment) = fragment {
        cleaned.push('#');
        cleaned.push_str(fragment);
    }

    cleaned
}

/// Distinct user-facing failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerFailure {
    InvalidToken,
    TokenExpired,
    TokenAlreadyUsed,
    Network,
}

impl HandlerFailure {
    /// Message shown to the user; each failure maps to its own retry
    /// affordance
    pub fn user_message(&self) -> &'static str {
        match self {
            HandlerFailure::InvalidToken => "This link is not valid. Please request a new one.",
            HandlerFailure::TokenExpired => "This link has expired. Please request a new one.",
            HandlerFailure::TokenAlreadyUsed => {
                "This link was already used. If that was you, you are already signed in on another device."
            }
            HandlerFailure::Network => {
                "We could not reach the server. Check your connection and try again."
            }
        }
    }

    fn from_error_code(code: &str) -> Self {
        match code {
            "INVALID_TOKEN" => HandlerFailure::InvalidToken,
            "TOKEN_EXPIRED" => HandlerFailure::TokenExpired,
            "TOKEN_ALREADY_USED" => HandlerFailure::TokenAlreadyUsed,
            _ => HandlerFailure::Network,
        }
    }
}

/// Outcome of one handler pass over the entry URL
#[derive(Debug)]
pub enum HandlerOutcome {
    /// No token parameter present; nothing to do
    NoToken,
    SignedIn {
        session: SessionCredentials,
        continue_url: String,
        cleaned_url: String,
    },
    Failed {
        failure: HandlerFailure,
        cleaned_url: String,
    },
}

/// Client-side token handler
pub struct TokenHandler {
    http: reqwest::Client,
    base_url: String,
    issuer: Arc<dyn SessionIssuer>,
}

impl TokenHandler {
    pub fn new(base_url: impl Into<String>, issuer: Arc<dyn SessionIssuer>) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            issuer,
        }
    }

    /// Run one pass over the entry URL
    ///
    /// Safe to call again after a rebuild: the stripped URL carries no
    /// parameter to act on, and a racing duplicate verify is absorbed by the
    /// server's at-most-once transition.
    pub async fn handle_url(&self, url: &str) -> HandlerOutcome {
        let Some(deep_link) = extract_token(url) else {
            return HandlerOutcome::NoToken;
        };
        let cleaned_url = strip_token(url);

        match self.verify_remote(&deep_link).await {
            Ok(verified) => match self.issuer.issue(&verified.email).await {
                Ok(session) => HandlerOutcome::SignedIn {
                    session,
                    continue_url: verified.continue_url,
                    cleaned_url,
                },
                Err(e) => {
                    tracing::warn!("Session exchange failed after verify: {}", e);
                    HandlerOutcome::Failed {
                        failure: HandlerFailure::Network,
                        cleaned_url,
                    }
                }
            },
            Err(failure) => HandlerOutcome::Failed {
                failure,
                cleaned_url,
            },
        }
    }

    /// Call the verify endpoint matching the token's kind
    async fn verify_remote(
        &self,
        deep_link: &DeepLinkToken,
    ) -> Result<VerifyTokenResponse, HandlerFailure> {
        let endpoint = match deep_link.kind {
            RequestKind::Registration => "verifyRegistrationToken",
            RequestKind::SignIn => "verifySignInToken",
        };
        let url = format!("{}/auth/{}", self.base_url, endpoint);

        let response = self
            .http
            .post(&url)
            .json(&VerifyTokenRequest {
                token: deep_link.token.clone(),
            })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Verify request failed: {}", e);
                HandlerFailure::Network
            })?;

        if response.status().is_success() {
            response.json::<VerifyTokenResponse>().await.map_err(|e| {
                tracing::warn!("Malformed verify response: {}", e);
                HandlerFailure::Network
            })
        } else {
            let body = response
                .json::<ErrorResponse>()
                .await
                .map_err(|_| HandlerFailure::Network)?;
            Err(HandlerFailure::from_error_code(&body.error))
        }
    }
}
