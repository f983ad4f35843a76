use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result, msg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    PurchaseCompleted,
    PurchaseRefunded,
    CertificateIssued,
    SupportReply,
    Announcement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub read_at: Option<i64>,
    pub created_at: i64,
}

/// Content shared by every recipient of a fan-out.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

/// `POST /admin/notifications`
#[derive(Debug, Deserialize)]
pub struct BroadcastNotification {
    /// Only active enrollees of this course; everyone when absent
    pub course_id: Option<String>,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    #[serde(default)]
    pub email: bool,
}

impl BroadcastNotification {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::BadRequest(msg::TITLE_EMPTY.into()));
        }
        if self.body.trim().is_empty() {
            return Err(AppError::BadRequest("Body cannot be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct BroadcastResult {
    pub recipients: usize,
}
