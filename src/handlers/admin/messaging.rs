use std::time::Duration;

use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};

use super::audit;
use crate::db::{AppState, queries};
use crate::email::{EmailMessage, EmailSendResult};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::fulfillment::notify_users;
use crate::middleware::AuthContext;
use crate::models::{
    AuditAction, BroadcastNotification, BroadcastResult, Campaign, CreateCampaign,
    NewNotification, NotificationKind, Subscriber,
};
use crate::pagination::{Paginated, PaginationQuery};

// ============ Notifications ============

/// Announce something to every user, or to a course's active enrollees.
pub async fn broadcast_notification(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(input): Json<BroadcastNotification>,
) -> Result<Json<BroadcastResult>> {
    input.validate()?;

    let recipients = {
        let conn = state.db.get()?;
        match input.course_id.as_deref() {
            Some(course_id) => {
                queries::get_course_by_id(&conn, course_id)?.or_not_found(msg::COURSE_NOT_FOUND)?;
                queries::list_active_enrollee_ids(&conn, course_id)?
            }
            None => queries::list_all_user_ids(&conn)?,
        }
    };

    let notification = NewNotification {
        kind: NotificationKind::Announcement,
        title: input.title.trim().to_string(),
        body: input.body.trim().to_string(),
        link: input.link.clone(),
    };
    let count = notify_users(&state, &recipients, &notification)?;

    if input.email && !recipients.is_empty() {
        let state = state.clone();
        tokio::spawn(async move {
            email_recipients(&state, &recipients, &notification).await;
        });
    }

    audit(&state, &headers, &ctx, AuditAction::BroadcastNotification, "notification", "broadcast", Some(serde_json::json!({
        "course_id": input.course_id,
        "title": input.title,
        "recipients": count,
        "email": input.email,
    })))?;

    Ok(Json(BroadcastResult { recipients: count }))
}

async fn email_recipients(state: &AppState, user_ids: &[String], notification: &NewNotification) {
    for user_id in user_ids {
        let user = match state
            .db
            .get()
            .map_err(AppError::from)
            .and_then(|conn| queries::get_user_by_id(&conn, user_id))
        {
            Ok(Some(user)) => user,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(user_id = %user_id, "Failed to load notification recipient: {}", e);
                continue;
            }
        };
        let message = EmailMessage::notification(
            &user.email,
            &notification.title,
            &notification.body,
            notification.link.as_deref(),
        );
        if let Err(e) = state.email_service.send(&message).await {
            tracing::warn!(user_id = %user_id, "Notification email failed: {}", e);
        }
    }
}

// ============ Newsletter ============

pub async fn create_campaign(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(input): Json<CreateCampaign>,
) -> Result<(StatusCode, Json<Campaign>)> {
    input.validate()?;
    let conn = state.db.get()?;
    let campaign = queries::create_campaign(&conn, ctx.user_id(), &input)?;

    audit(&state, &headers, &ctx, AuditAction::CreateCampaign, "campaign", &campaign.id, Some(serde_json::json!({
        "subject": campaign.subject,
    })))?;

    Ok((StatusCode::CREATED, Json(campaign)))
}

pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Paginated<Campaign>>> {
    let conn = state.db.get()?;
    let (campaigns, total) = queries::list_campaigns_paginated(&conn, query.limit(), query.offset())?;
    Ok(Json(Paginated::from_query(campaigns, total, &query)))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Campaign>> {
    let conn = state.db.get()?;
    let campaign = queries::get_campaign(&conn, &id)?.or_not_found(msg::CAMPAIGN_NOT_FOUND)?;
    Ok(Json(campaign))
}

/// Start delivering a draft campaign in the background. Returns 202 with the
/// campaign in `sending` state.
pub async fn send_campaign(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Campaign>)> {
    let (campaign, subscribers) = {
        let conn = state.db.get()?;
        queries::get_campaign(&conn, &id)?.or_not_found(msg::CAMPAIGN_NOT_FOUND)?;
        let subscribers = queries::list_active_subscribers(&conn)?;
        if !queries::try_start_campaign(&conn, &id, subscribers.len() as i64)? {
            return Err(AppError::Conflict("Campaign has already been sent".into()));
        }
        let campaign = queries::get_campaign(&conn, &id)?.or_not_found(msg::CAMPAIGN_NOT_FOUND)?;
        (campaign, subscribers)
    };

    audit(&state, &headers, &ctx, AuditAction::SendCampaign, "campaign", &id, Some(serde_json::json!({
        "recipients": subscribers.len(),
    })))?;

    tracing::info!(campaign_id = %id, recipients = subscribers.len(), "Newsletter campaign started");

    let task_state = state.clone();
    let task_campaign = campaign.clone();
    tokio::spawn(async move {
        deliver_campaign(task_state, task_campaign, subscribers).await;
    });

    Ok((StatusCode::ACCEPTED, Json(campaign)))
}

/// Send in batches, recording progress after each one.
async fn deliver_campaign(state: AppState, campaign: Campaign, subscribers: Vec<Subscriber>) {
    let settings = state.newsletter;
    let batch_size = settings.batch_size.max(1);

    for (index, batch) in subscribers.chunks(batch_size).enumerate() {
        if index > 0 && settings.batch_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(settings.batch_delay_ms)).await;
        }

        let (mut sent, mut failed) = (0i64, 0i64);
        for subscriber in batch {
            let unsubscribe_url = format!(
                "{}/newsletter/unsubscribe?token={}",
                state.base_url, subscriber.unsubscribe_token
            );
            let message = EmailMessage::newsletter(
                &subscriber.email,
                &campaign.subject,
                &campaign.body,
                &unsubscribe_url,
            );
            match state.email_service.send(&message).await {
                Ok(EmailSendResult::Sent | EmailSendResult::Disabled) => sent += 1,
                Err(e) => {
                    tracing::warn!(campaign_id = %campaign.id, to = %subscriber.email, "Newsletter email failed: {}", e);
                    failed += 1;
                }
            }
        }

        let recorded = state
            .db
            .get()
            .map_err(AppError::from)
            .and_then(|conn| queries::record_campaign_progress(&conn, &campaign.id, sent, failed));
        if let Err(e) = recorded {
            tracing::error!(campaign_id = %campaign.id, "Failed to record campaign progress: {}", e);
        }
    }

    match state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|conn| queries::complete_campaign(&conn, &campaign.id))
    {
        Ok(()) => tracing::info!(campaign_id = %campaign.id, "Newsletter campaign sent"),
        Err(e) => tracing::error!(campaign_id = %campaign.id, "Failed to complete campaign: {}", e),
    }
}
