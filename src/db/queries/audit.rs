use rusqlite::{Connection, params};

use super::{Filter, now};
use crate::db::from_row::AUDIT_LOG_COLS;
use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

/// Who did something, captured at request time.
#[derive(Debug, Clone, Copy)]
pub struct AuditActor<'a> {
    pub actor_type: ActorType,
    pub user_id: Option<&'a str>,
    pub user_email: Option<&'a str>,
}

#[allow(clippy::too_many_arguments)]
pub fn create_audit_log(
    conn: &Connection,
    enabled: bool,
    actor: AuditActor<'_>,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    details: Option<&serde_json::Value>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<AuditLog> {
    let log = AuditLog {
        id: EntityType::AuditLog.gen_id(),
        timestamp: now(),
        actor_type: actor.actor_type,
        user_id: actor.user_id.map(String::from),
        user_email: actor.user_email.map(String::from),
        action: action.to_string(),
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        details: details.cloned(),
        ip_address: ip_address.map(String::from),
        user_agent: user_agent.map(String::from),
    };

    // Skip database insert if audit logging is disabled
    if !enabled {
        return Ok(log);
    }

    conn.execute(
        "INSERT INTO audit_logs (id, timestamp, actor_type, user_id, user_email, action, resource_type, resource_id, details, ip_address, user_agent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &log.id,
            log.timestamp,
            log.actor_type.as_ref(),
            &log.user_id,
            &log.user_email,
            &log.action,
            &log.resource_type,
            &log.resource_id,
            details.map(|d| d.to_string()),
            &log.ip_address,
            &log.user_agent
        ],
    )?;

    Ok(log)
}

pub fn query_audit_logs(conn: &Connection, query: &AuditLogQuery) -> Result<(Vec<AuditLog>, i64)> {
    let mut filter = Filter::default();
    filter.push_opt("actor_type = ?", query.actor_type.map(|a| a.as_ref().to_string()));
    filter.push_opt("user_id = ?", query.user_id.clone());
    filter.push_opt("action = ?", query.action.clone());
    filter.push_opt("resource_type = ?", query.resource_type.clone());
    filter.push_opt("resource_id = ?", query.resource_id.clone());
    filter.push_opt("timestamp >= ?", query.from_timestamp);
    filter.push_opt("timestamp <= ?", query.to_timestamp);
    filter.paginate(
        conn,
        AUDIT_LOG_COLS,
        "audit_logs",
        "timestamp DESC, rowid DESC",
        query.limit(),
        query.offset(),
    )
}

/// Delete audit logs older than the retention period.
/// Called on startup when AUDIT_LOG_RETENTION_DAYS > 0.
pub fn purge_old_audit_logs(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM audit_logs WHERE timestamp < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}
