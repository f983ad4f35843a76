use axum::{
    extract::{Extension, State},
    http::StatusCode,
};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::middleware::AuthContext;
use crate::models::{Notification, NotificationListQuery, UnreadCount};
use crate::pagination::{Paginated, PaginationQuery};

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub updated: usize,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<NotificationListQuery>,
) -> Result<Json<Paginated<Notification>>> {
    let page = PaginationQuery {
        limit: query.limit,
        offset: query.offset,
    };
    let conn = state.db.get()?;
    let (items, total) = queries::list_notifications(
        &conn,
        ctx.user_id(),
        query.unread_only,
        page.limit(),
        page.offset(),
    )?;
    Ok(Json(Paginated::from_query(items, total, &page)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let conn = state.db.get()?;
    if !queries::mark_notification_read(&conn, ctx.user_id(), &id)? {
        return Err(AppError::NotFound(msg::NOTIFICATION_NOT_FOUND.into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<MarkedRead>> {
    let conn = state.db.get()?;
    let updated = queries::mark_all_notifications_read(&conn, ctx.user_id())?;
    Ok(Json(MarkedRead { updated }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<UnreadCount>> {
    let conn = state.db.get()?;
    let unread = queries::count_unread_notifications(&conn, ctx.user_id())?;
    Ok(Json(UnreadCount { unread }))
}
