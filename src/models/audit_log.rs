use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActorType {
    User,
    Public,
    System,
}

/// Stored as snake_case strings; the first word doubles as the verb in
/// [`AuditLog::formatted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    // Users
    Login,
    UpdateProfile,
    UpdateUserRole,
    BootstrapAdmin,
    SeedData,
    // Catalog
    CreateCourse,
    UpdateCourse,
    DeleteCourse,
    PublishCourse,
    UnpublishCourse,
    CreateModule,
    UpdateModule,
    DeleteModule,
    CreateLesson,
    UpdateLesson,
    DeleteLesson,
    UploadVideo,
    DeleteVideo,
    // Coupons
    CreateCoupon,
    UpdateCoupon,
    DeleteCoupon,
    // Purchases
    Checkout,
    MarkPurchasePaid,
    MarkPurchaseFailed,
    RefundPurchase,
    ExpirePurchase,
    // Learning
    IssueCertificate,
    // Messaging
    BroadcastNotification,
    CreateCampaign,
    SendCampaign,
    CloseConversation,
    // Maintenance
    PurgeAuditLogs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub timestamp: i64,
    pub actor_type: ActorType,
    pub user_id: Option<String>,
    /// Email of the actor at the time of the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub actor_type: Option<ActorType>,
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub from_timestamp: Option<i64>,
    pub to_timestamp: Option<i64>,
    /// Maximum number of items to return (default: 50, max: 100)
    pub limit: Option<i64>,
    /// Number of items to skip (default: 0)
    pub offset: Option<i64>,
}

impl AuditLogQuery {
    /// Get the limit, clamped to valid range
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    /// Get the offset, minimum 0
    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

impl AuditLog {
    /// Format as a human-readable line.
    ///
    /// Format: `[TIMESTAMP] [ActorType] actor VERB OBJECT RESOURCE_ID`
    ///
    /// Example: `[2024-01-15 14:32:05] [User]   "ana@example.com" created course ch_crs_...`
    pub fn formatted(&self) -> String {
        use chrono::{TimeZone, Utc};

        let timestamp = Utc
            .timestamp_opt(self.timestamp, 0)
            .single()
            .map(|dt| format!("[{}]", dt.format("%Y-%m-%d %H:%M:%S")))
            .unwrap_or_else(|| format!("[{}]", self.timestamp));

        // Fixed width for alignment
        let actor_type = match self.actor_type {
            ActorType::User => "[User]  ",
            ActorType::Public => "[Public]",
            ActorType::System => "[System]",
        };

        let actor_display = self
            .user_email
            .as_ref()
            .map(|e| format!(" \"{}\"", e))
            .or_else(|| self.user_id.as_ref().map(|id| format!(" ({})", id)))
            .unwrap_or_default();

        let verb_phrase = Self::action_to_verb_phrase(&self.action, &self.resource_type);

        format!(
            "{} {}{} {} {}",
            timestamp, actor_type, actor_display, verb_phrase, self.resource_id
        )
    }

    /// Convert an action string to a past-tense verb phrase.
    /// e.g., "create_course" -> "created course"
    fn action_to_verb_phrase(action: &str, resource_type: &str) -> String {
        let parts: Vec<&str> = action.split('_').collect();
        if parts.is_empty() {
            return action.to_string();
        }

        let verb = Self::to_past_tense(parts[0]);

        if parts.len() > 1 {
            let object = parts[1..].join(" ");
            format!("{} {}", verb, object)
        } else {
            format!("{} {}", verb, resource_type)
        }
    }

    fn to_past_tense(verb: &str) -> &str {
        match verb {
            "create" => "created",
            "update" => "updated",
            "delete" => "deleted",
            "publish" => "published",
            "unpublish" => "unpublished",
            "upload" => "uploaded",
            "mark" => "marked",
            "refund" => "refunded",
            "expire" => "expired",
            "issue" => "issued",
            "broadcast" => "broadcast",
            "send" => "sent",
            "close" => "closed",
            "seed" => "seeded",
            "bootstrap" => "bootstrapped",
            "purge" => "purged",
            "login" => "logged in to",
            "checkout" => "checked out",
            other => other,
        }
    }
}

/// Wrapper for AuditLog that includes a human-readable `formatted` field.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogResponse {
    #[serde(flatten)]
    pub log: AuditLog,
    pub formatted: String,
}

impl From<AuditLog> for AuditLogResponse {
    fn from(log: AuditLog) -> Self {
        let formatted = log.formatted();
        Self { log, formatted }
    }
}
