use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};

use super::audit;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::middleware::AuthContext;
use crate::models::{AuditAction, UpdateUserRole, User, UserListQuery, UserRole};
use crate::pagination::{Paginated, PaginationQuery};

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Paginated<User>>> {
    let page = PaginationQuery {
        limit: query.limit,
        offset: query.offset,
    };
    let conn = state.db.get()?;
    let (users, total) = queries::list_users_paginated(&conn, query.role, page.limit(), page.offset())?;
    Ok(Json(Paginated::from_query(users, total, &page)))
}

/// Change a user's role. The last remaining admin cannot be demoted.
pub async fn update_user_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<UpdateUserRole>,
) -> Result<Json<User>> {
    let conn = state.db.get()?;
    let existing = queries::get_user_by_id(&conn, &id)?.or_not_found(msg::USER_NOT_FOUND)?;

    if existing.role == UserRole::Admin
        && input.role != UserRole::Admin
        && queries::count_admins(&conn)? <= 1
    {
        return Err(AppError::Conflict("Cannot demote the last admin".into()));
    }

    let user = queries::set_user_role(&conn, &id, input.role)?.or_not_found(msg::USER_NOT_FOUND)?;

    audit(&state, &headers, &ctx, AuditAction::UpdateUserRole, "user", &id, Some(serde_json::json!({
        "email": user.email,
        "from": existing.role.as_ref(),
        "to": user.role.as_ref(),
    })))?;

    Ok(Json(user))
}
