use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::models::{Course, User};
use crate::util::extract_bearer_token;

/// The authenticated user, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
}

impl AuthContext {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.role.is_admin()
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(msg::INSUFFICIENT_PERMISSIONS.into()))
        }
    }

    /// Admins manage every course, instructors only their own.
    pub fn require_course_owner(&self, course: &Course) -> Result<()> {
        if self.is_admin() || (self.user.role.is_staff() && course.instructor_id == self.user.id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(msg::INSUFFICIENT_PERMISSIONS.into()))
        }
    }

    /// Owner of a resource, or an admin. Others get the resource's not-found
    /// message.
    pub fn require_self_or_admin(&self, owner_id: &str, not_found: &str) -> Result<()> {
        if self.is_admin() || self.user.id == owner_id {
            Ok(())
        } else {
            Err(AppError::NotFound(not_found.into()))
        }
    }
}

/// Resolve a session token to a live user.
///
/// The role always comes from the database, so demotions and deletions take
/// effect before the token expires.
pub fn authenticate_token(state: &AppState, token: &str) -> Result<User> {
    let session = state.session_keys.verify(token)?;
    let conn = state.db.get()?;
    queries::get_user_by_id(&conn, &session.user_id)?.ok_or(AppError::Unauthorized)
}

pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let token = extract_bearer_token(headers).ok_or(AppError::Unauthorized)?;
    authenticate_token(state, token)
}

pub async fn require_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let user = authenticate(&state, request.headers())?;
    request.extensions_mut().insert(AuthContext { user });
    Ok(next.run(request).await)
}

pub async fn require_staff(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let user = authenticate(&state, request.headers())?;
    if !user.role.is_staff() {
        return Err(AppError::Forbidden(msg::INSUFFICIENT_PERMISSIONS.into()));
    }
    request.extensions_mut().insert(AuthContext { user });
    Ok(next.run(request).await)
}

pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let user = authenticate(&state, request.headers())?;
    if !user.role.is_admin() {
        return Err(AppError::Forbidden(msg::INSUFFICIENT_PERMISSIONS.into()));
    }
    request.extensions_mut().insert(AuthContext { user });
    Ok(next.run(request).await)
}
