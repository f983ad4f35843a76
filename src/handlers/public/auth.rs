use axum::{extract::State, http::HeaderMap};
use serde::Serialize;

use crate::crypto::generate_login_code;
use crate::db::{AppState, queries};
use crate::email::EmailMessage;
use crate::error::{AppError, Result, msg};
use crate::extractors::Json;
use crate::models::{
    AuditAction, CreateUser, RequestLoginCode, SessionResponse, UserRole, VerifyLoginCode,
    normalize_email, validate_email_format,
};
use crate::util::AuditLogBuilder;

/// Sign-in codes are valid for 15 minutes.
pub const LOGIN_CODE_TTL_MINUTES: i64 = 15;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Email a one-time sign-in code, creating the account on first use.
///
/// The response is identical whether or not the address already has an
/// account.
pub async fn request_login_code(
    State(state): State<AppState>,
    Json(input): Json<RequestLoginCode>,
) -> Result<Json<MessageResponse>> {
    validate_email_format(&input.email)?;
    let email = normalize_email(&input.email);

    if !state.login_rate_limiter.check(&email) {
        tracing::warn!(email = %email, "Sign-in code rate limit exceeded");
        return Err(AppError::TooManyRequests(
            "Too many sign-in codes requested, try again later".into(),
        ));
    }

    let conn = state.db.get()?;
    let user = match queries::get_user_by_email(&conn, &email)? {
        Some(user) => user,
        None => {
            let name = input
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    AppError::BadRequest("Name is required to create an account".into())
                })?;
            let user = queries::create_user(
                &conn,
                &CreateUser {
                    email: email.clone(),
                    name: name.to_string(),
                    role: UserRole::Student,
                },
            )?;
            tracing::info!(user_id = %user.id, "Created account on first sign-in");
            user
        }
    };

    let code = generate_login_code();
    queries::create_login_code(&conn, &user.id, &code, LOGIN_CODE_TTL_MINUTES * 60)?;

    if state.email_service.is_enabled() {
        state
            .email_service
            .send_in_background(EmailMessage::login_code(&email, &code, LOGIN_CODE_TTL_MINUTES));
    } else {
        tracing::info!(email = %email, code = %code, "Email disabled, sign-in code logged");
    }

    Ok(Json(MessageResponse {
        message: msg::LOGIN_CODE_SENT,
    }))
}

/// Exchange a sign-in code for a session token.
pub async fn verify_login_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<VerifyLoginCode>,
) -> Result<Json<SessionResponse>> {
    let email = normalize_email(&input.email);
    let code = input.code.trim();

    let conn = state.db.get()?;
    let user = queries::get_user_by_email(&conn, &email)?
        .ok_or_else(|| AppError::BadRequest(msg::INVALID_LOGIN_CODE.into()))?;

    if !queries::try_consume_login_code(&conn, &user.id, code)? {
        tracing::debug!(user_id = %user.id, "Sign-in code rejected");
        return Err(AppError::BadRequest(msg::INVALID_LOGIN_CODE.into()));
    }

    let (token, expires_at) = state.session_keys.issue(&user.id, user.role)?;

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .user(&user)
        .action(AuditAction::Login)
        .resource("user", &user.id)
        .save()?;

    Ok(Json(SessionResponse {
        token,
        expires_at,
        user,
    }))
}
