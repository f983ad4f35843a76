use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub unsubscribe_token: String,
    pub subscribed_at: i64,
    pub unsubscribed_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct Subscribe {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeQuery {
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Sending,
    Sent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub status: CampaignStatus,
    pub total_recipients: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub created_by: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaign {
    pub subject: String,
    pub body: String,
}

impl CreateCampaign {
    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(AppError::BadRequest("Subject cannot be empty".into()));
        }
        if self.body.trim().is_empty() {
            return Err(AppError::BadRequest("Body cannot be empty".into()));
        }
        Ok(())
    }
}
