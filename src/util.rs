//! Shared request helpers.

use axum::http::HeaderMap;
use rusqlite::Connection;

use crate::db::queries::{self, AuditActor};
use crate::error::Result;
use crate::models::{ActorType, AuditAction, AuditLog};

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (for proxied requests), then `x-real-ip`,
/// and extracts the `user-agent` header for audit logging.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string());

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Builder for creating audit log entries.
///
/// # Example
/// ```ignore
/// AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
///     .user(&ctx.user)
///     .action(AuditAction::CreateCourse)
///     .resource("course", &course.id)
///     .details(&serde_json::json!({ "slug": course.slug }))
///     .save()?;
/// ```
pub struct AuditLogBuilder<'a> {
    conn: &'a Connection,
    enabled: bool,
    headers: Option<&'a HeaderMap>,
    actor_type: ActorType,
    user_id: Option<&'a str>,
    user_email: Option<&'a str>,
    action: AuditAction,
    resource_type: &'a str,
    resource_id: &'a str,
    details: Option<&'a serde_json::Value>,
}

impl<'a> AuditLogBuilder<'a> {
    /// Create a builder for an entry caused by an HTTP request.
    pub fn new(conn: &'a Connection, enabled: bool, headers: &'a HeaderMap) -> Self {
        Self {
            headers: Some(headers),
            ..Self::system(conn, enabled)
        }
    }

    /// Create a builder for an entry with no request behind it
    /// (webhooks reconciled in the background, startup tasks).
    pub fn system(conn: &'a Connection, enabled: bool) -> Self {
        Self {
            conn,
            enabled,
            headers: None,
            actor_type: ActorType::System,
            user_id: None,
            user_email: None,
            action: AuditAction::SeedData,
            resource_type: "",
            resource_id: "",
            details: None,
        }
    }

    /// Attribute the entry to a signed-in user.
    pub fn user(mut self, user: &'a crate::models::User) -> Self {
        self.actor_type = ActorType::User;
        self.user_id = Some(&user.id);
        self.user_email = Some(&user.email);
        self
    }

    /// Set the action being performed.
    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = action;
        self
    }

    /// Set the resource type and ID being acted upon.
    pub fn resource(mut self, resource_type: &'a str, resource_id: &'a str) -> Self {
        self.resource_type = resource_type;
        self.resource_id = resource_id;
        self
    }

    /// Set optional details JSON.
    pub fn details(mut self, details: &'a serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Save the audit log entry to the database.
    pub fn save(self) -> Result<AuditLog> {
        let (ip, ua) = self
            .headers
            .map(extract_request_info)
            .unwrap_or_default();
        queries::create_audit_log(
            self.conn,
            self.enabled,
            AuditActor {
                actor_type: self.actor_type,
                user_id: self.user_id,
                user_email: self.user_email,
            },
            self.action.as_ref(),
            self.resource_type,
            self.resource_id,
            self.details,
            ip.as_deref(),
            ua.as_deref(),
        )
    }
}
