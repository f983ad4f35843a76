use rusqlite::{Connection, params};

use super::{Filter, now};
use crate::crypto::generate_token;
use crate::db::from_row::{
    CAMPAIGN_COLS, CONVERSATION_COLS, MESSAGE_COLS, NOTIFICATION_COLS, SUBSCRIBER_COLS, query_all,
    query_one,
};
use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

// ============ Notifications ============

/// Insert one notification per recipient. Call inside a transaction so a
/// broadcast lands for everyone or no one.
pub fn create_notifications(
    conn: &Connection,
    user_ids: &[String],
    notification: &NewNotification,
) -> Result<Vec<Notification>> {
    let now = now();
    let mut stmt = conn.prepare(
        "INSERT INTO notifications (id, user_id, kind, title, body, link, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let mut created = Vec::with_capacity(user_ids.len());
    for user_id in user_ids {
        let id = EntityType::Notification.gen_id();
        stmt.execute(params![
            &id,
            user_id,
            notification.kind.as_ref(),
            &notification.title,
            &notification.body,
            &notification.link,
            now
        ])?;
        created.push(Notification {
            id,
            user_id: user_id.clone(),
            kind: notification.kind,
            title: notification.title.clone(),
            body: notification.body.clone(),
            link: notification.link.clone(),
            read_at: None,
            created_at: now,
        });
    }
    Ok(created)
}

pub fn list_notifications(
    conn: &Connection,
    user_id: &str,
    unread_only: bool,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Notification>, i64)> {
    let mut filter = Filter::default();
    filter.push("user_id = ?", user_id.to_string());
    if unread_only {
        filter.raw("read_at IS NULL");
    }
    filter.paginate(
        conn,
        NOTIFICATION_COLS,
        "notifications",
        "created_at DESC, rowid DESC",
        limit,
        offset,
    )
}

/// Marks a notification read if it belongs to `user_id`. Already-read
/// notifications keep their original `read_at`.
pub fn mark_notification_read(conn: &Connection, user_id: &str, id: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM notifications WHERE id = ?1 AND user_id = ?2)",
        params![id, user_id],
        |row| row.get(0),
    )?;
    if exists {
        conn.execute(
            "UPDATE notifications SET read_at = ?1 WHERE id = ?2 AND read_at IS NULL",
            params![now(), id],
        )?;
    }
    Ok(exists)
}

pub fn mark_all_notifications_read(conn: &Connection, user_id: &str) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE notifications SET read_at = ?1 WHERE user_id = ?2 AND read_at IS NULL",
        params![now(), user_id],
    )?)
}

pub fn count_unread_notifications(conn: &Connection, user_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read_at IS NULL",
        params![user_id],
        |row| row.get(0),
    )?)
}

// ============ Newsletter ============

/// Subscribe an address, re-activating it if it had unsubscribed.
pub fn subscribe(conn: &Connection, email: &str) -> Result<Subscriber> {
    let email = normalize_email(email);
    let subscriber = conn.query_row(
        &format!(
            "INSERT INTO newsletter_subscribers (id, email, unsubscribe_token, subscribed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(email) DO UPDATE SET
                subscribed_at = CASE WHEN unsubscribed_at IS NULL THEN subscribed_at ELSE excluded.subscribed_at END,
                unsubscribed_at = NULL
             RETURNING {}",
            SUBSCRIBER_COLS
        ),
        params![EntityType::Subscriber.gen_id(), &email, generate_token(), now()],
        <Subscriber as crate::db::from_row::FromRow>::from_row,
    )?;
    Ok(subscriber)
}

/// Returns false for unknown tokens.
pub fn unsubscribe_by_token(conn: &Connection, token: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM newsletter_subscribers WHERE unsubscribe_token = ?1)",
        params![token],
        |row| row.get(0),
    )?;
    if exists {
        conn.execute(
            "UPDATE newsletter_subscribers SET unsubscribed_at = ?1
             WHERE unsubscribe_token = ?2 AND unsubscribed_at IS NULL",
            params![now(), token],
        )?;
    }
    Ok(exists)
}

pub fn list_active_subscribers(conn: &Connection) -> Result<Vec<Subscriber>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM newsletter_subscribers WHERE unsubscribed_at IS NULL ORDER BY subscribed_at",
            SUBSCRIBER_COLS
        ),
        &[],
    )
}

pub fn create_campaign(conn: &Connection, created_by: &str, input: &CreateCampaign) -> Result<Campaign> {
    let id = EntityType::Campaign.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO newsletter_campaigns (id, subject, body, status, created_by, created_at)
         VALUES (?1, ?2, ?3, 'draft', ?4, ?5)",
        params![&id, input.subject.trim(), &input.body, created_by, now],
    )?;
    Ok(Campaign {
        id,
        subject: input.subject.trim().to_string(),
        body: input.body.clone(),
        status: CampaignStatus::Draft,
        total_recipients: 0,
        sent_count: 0,
        failed_count: 0,
        created_by: created_by.to_string(),
        created_at: now,
        started_at: None,
        completed_at: None,
    })
}

pub fn get_campaign(conn: &Connection, id: &str) -> Result<Option<Campaign>> {
    query_one(
        conn,
        &format!("SELECT {} FROM newsletter_campaigns WHERE id = ?1", CAMPAIGN_COLS),
        &[&id],
    )
}

pub fn list_campaigns_paginated(conn: &Connection, limit: i64, offset: i64) -> Result<(Vec<Campaign>, i64)> {
    Filter::default().paginate(
        conn,
        CAMPAIGN_COLS,
        "newsletter_campaigns",
        "created_at DESC",
        limit,
        offset,
    )
}

/// Draft -> Sending. Only one caller can win, so a campaign is never sent twice.
pub fn try_start_campaign(conn: &Connection, id: &str, total_recipients: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE newsletter_campaigns SET status = 'sending', total_recipients = ?1, started_at = ?2
         WHERE id = ?3 AND status = 'draft'",
        params![total_recipients, now(), id],
    )?;
    Ok(affected > 0)
}

pub fn record_campaign_progress(conn: &Connection, id: &str, sent: i64, failed: i64) -> Result<()> {
    conn.execute(
        "UPDATE newsletter_campaigns SET sent_count = sent_count + ?1, failed_count = failed_count + ?2
         WHERE id = ?3",
        params![sent, failed, id],
    )?;
    Ok(())
}

pub fn complete_campaign(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE newsletter_campaigns SET status = 'sent', completed_at = ?1 WHERE id = ?2",
        params![now(), id],
    )?;
    Ok(())
}

// ============ Support ============

pub fn create_conversation(conn: &Connection, user_id: &str, subject: &str) -> Result<SupportConversation> {
    let id = EntityType::Conversation.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO support_conversations (id, user_id, subject, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'open', ?4, ?5)",
        params![&id, user_id, subject.trim(), now, now],
    )?;
    Ok(SupportConversation {
        id,
        user_id: user_id.to_string(),
        subject: subject.trim().to_string(),
        status: ConversationStatus::Open,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_conversation(conn: &Connection, id: &str) -> Result<Option<SupportConversation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM support_conversations WHERE id = ?1",
            CONVERSATION_COLS
        ),
        &[&id],
    )
}

/// `user_id = None` lists every conversation (staff inbox).
pub fn list_conversations(
    conn: &Connection,
    user_id: Option<&str>,
    status: Option<ConversationStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<SupportConversation>, i64)> {
    let mut filter = Filter::default();
    filter.push_opt("user_id = ?", user_id.map(String::from));
    filter.push_opt("status = ?", status.map(|s| s.as_ref().to_string()));
    filter.paginate(
        conn,
        CONVERSATION_COLS,
        "support_conversations",
        "updated_at DESC",
        limit,
        offset,
    )
}

/// Append a message, rejecting closed conversations atomically.
/// Returns None when the conversation is closed.
pub fn create_message(
    conn: &Connection,
    conversation_id: &str,
    sender_id: &str,
    body: &str,
) -> Result<Option<SupportMessage>> {
    let now = now();
    let touched = conn.execute(
        "UPDATE support_conversations SET updated_at = ?1 WHERE id = ?2 AND status = 'open'",
        params![now, conversation_id],
    )?;
    if touched == 0 {
        return Ok(None);
    }

    let id = EntityType::Message.gen_id();
    conn.execute(
        "INSERT INTO support_messages (id, conversation_id, sender_id, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, conversation_id, sender_id, body, now],
    )?;
    Ok(Some(SupportMessage {
        id,
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        body: body.to_string(),
        created_at: now,
    }))
}

pub fn list_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<SupportMessage>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM support_messages WHERE conversation_id = ?1 ORDER BY created_at, rowid",
            MESSAGE_COLS
        ),
        &[&conversation_id],
    )
}

pub fn close_conversation(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE support_conversations SET status = 'closed', updated_at = ?1
         WHERE id = ?2 AND status = 'open'",
        params![now(), id],
    )?;
    Ok(affected > 0)
}
