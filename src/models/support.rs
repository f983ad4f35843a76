use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result};

const MAX_MESSAGE_LEN: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportConversation {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    pub status: ConversationStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: i64,
}

pub fn validate_message_body(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("Message cannot be empty".into()));
    }
    if body.len() > MAX_MESSAGE_LEN {
        return Err(AppError::BadRequest(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(())
}

/// `POST /support/conversations`
#[derive(Debug, Deserialize)]
pub struct CreateConversation {
    pub subject: String,
    pub message: String,
}

impl CreateConversation {
    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(AppError::BadRequest("Subject cannot be empty".into()));
        }
        validate_message_body(&self.message)
    }
}

/// Body of `POST .../messages` and of client frames on the chat socket.
#[derive(Debug, Deserialize)]
pub struct PostMessage {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ConversationListQuery {
    pub status: Option<ConversationStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConversationWithMessages {
    #[serde(flatten)]
    pub conversation: SupportConversation,
    pub messages: Vec<SupportMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatSocketQuery {
    /// Session token; browsers cannot set headers on WebSocket upgrades
    pub token: String,
}
