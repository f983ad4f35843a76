use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::models::{Subscribe, UnsubscribeQuery, normalize_email, validate_email_format};

use super::auth::MessageResponse;

/// Subscribing again after unsubscribing re-activates the address.
pub async fn subscribe(
    State(state): State<AppState>,
    Json(input): Json<Subscribe>,
) -> Result<Json<MessageResponse>> {
    validate_email_format(&input.email)?;
    let conn = state.db.get()?;
    let subscriber = queries::subscribe(&conn, &normalize_email(&input.email))?;
    tracing::debug!(subscriber_id = %subscriber.id, "Newsletter subscription");
    Ok(Json(MessageResponse {
        message: "Subscribed",
    }))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Query(query): Query<UnsubscribeQuery>,
) -> Result<Json<MessageResponse>> {
    let conn = state.db.get()?;
    if !queries::unsubscribe_by_token(&conn, &query.token)? {
        return Err(AppError::NotFound("Subscription not found".into()));
    }
    Ok(Json(MessageResponse {
        message: "Unsubscribed",
    }))
}
