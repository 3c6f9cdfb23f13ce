/// Registration and sign-in endpoints
use crate::{
    api::middleware::requester_ip,
    context::AppContext,
    db::records::{PendingAuthRequest, RequestKind},
    error::AuthResult,
    mailer::verification_link,
    request::{
        CleanupResponse, CreateRegistrationRequest, CreateRequestResponse, CreateSignInRequest,
        VerifyTokenRequest, VerifyTokenResponse,
    },
};
use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use std::sync::Arc;

/// Build auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/createRegistration", post(create_registration))
        .route(
            "/auth/verifyRegistrationToken",
            post(verify_registration_token),
        )
        .route("/auth/createSignInRequest", post(create_sign_in_request))
        .route("/auth/verifySignInToken", post(verify_sign_in_token))
        .route(
            "/auth/cleanupExpiredRegistrations",
            post(cleanup_expired_registrations),
        )
}

/// Create registration endpoint
///
/// Creates the pending record and queues the token email. Note that the raw
/// token is also returned in the response body; see DESIGN.md for the trust
/// boundary this implies for public deployments.
async fn create_registration(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateRegistrationRequest>,
) -> AuthResult<Json<CreateRequestResponse>> {
    let record = ctx
        .request_manager
        .create_registration(&req.email, &req.name, &req.continue_url)
        .await?;

    dispatch_link_email(&ctx, &record);

    Ok(Json(CreateRequestResponse {
        success: true,
        token: record.token,
        expires_at: record.expires_at,
    }))
}

/// Create sign-in request endpoint
async fn create_sign_in_request(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateSignInRequest>,
) -> AuthResult<Json<CreateRequestResponse>> {
    let record = ctx
        .request_manager
        .create_sign_in(&req.email, &req.continue_url)
        .await?;

    dispatch_link_email(&ctx, &record);

    Ok(Json(CreateRequestResponse {
        success: true,
        token: record.token,
        expires_at: record.expires_at,
    }))
}

/// Verify registration token endpoint
async fn verify_registration_token(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(req): Json<VerifyTokenRequest>,
) -> AuthResult<Json<VerifyTokenResponse>> {
    verify_token(ctx, headers, req, RequestKind::Registration).await
}

/// Verify sign-in token endpoint
async fn verify_sign_in_token(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(req): Json<VerifyTokenRequest>,
) -> AuthResult<Json<VerifyTokenResponse>> {
    verify_token(ctx, headers, req, RequestKind::SignIn).await
}

/// Shared verify path for both token kinds
///
/// Consuming the token and the profile side effect both happen here so the
/// profile is created or touched exactly when a verification succeeds.
async fn verify_token(
    ctx: AppContext,
    headers: HeaderMap,
    req: VerifyTokenRequest,
    kind: RequestKind,
) -> AuthResult<Json<VerifyTokenResponse>> {
    let ip = requester_ip(&headers);

    let verified = ctx
        .request_manager
        .verify(&req.token, kind, ip.as_deref())
        .await?;

    match verified.kind {
        RequestKind::Registration => {
            let name = verified.display_name.clone().unwrap_or_default();
            ctx.profile_manager
                .ensure_profile(&verified.email, &name)
                .await?;
            ctx.profile_manager
                .record_login(&verified.email, ip.as_deref())
                .await?;
        }
        RequestKind::SignIn => {
            ctx.profile_manager
                .record_login(&verified.email, ip.as_deref())
                .await?;
        }
    }

    Ok(Json(VerifyTokenResponse {
        success: true,
        email: verified.email,
        name: verified.display_name,
        continue_url: verified.continue_url,
    }))
}

/// Expiry reaper endpoint (scheduled trigger)
async fn cleanup_expired_registrations(
    State(ctx): State<AppContext>,
) -> AuthResult<Json<CleanupResponse>> {
    let deleted = ctx.request_manager.cleanup_expired().await?;

    Ok(Json(CleanupResponse { deleted }))
}

/// Queue the token email without gating the response on delivery
fn dispatch_link_email(ctx: &AppContext, record: &PendingAuthRequest) {
    if !ctx.mailer.is_configured() {
        tracing::warn!(email = %record.email, "Email not configured, auth link not sent");
        return;
    }

    let mailer = Arc::clone(&ctx.mailer);
    let record = record.clone();
    tokio::spawn(async move {
        let link = verification_link(&record.continue_url, record.kind, &record.token);
        let name = record.display_name.as_deref().unwrap_or("there");
        let result = match record.kind {
            RequestKind::Registration => {
                mailer
                    .send_registration_email(&record.email, name, &link)
                    .await
            }
            RequestKind::SignIn => mailer.send_sign_in_email(&record.email, name, &link).await,
        };
        if let Err(e) = result {
            // The record still expires through the reaper; the user retries
            // from scratch.
            tracing::warn!(email = %record.email, "Failed to send auth link email: {}", e);
        }
    });
}
