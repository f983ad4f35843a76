mod coupons;
mod courses;
mod messaging;
mod purchases;
mod reports;
mod users;

pub use coupons::*;
pub use courses::*;
pub use messaging::*;
pub use purchases::*;
pub use reports::*;
pub use users::*;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderMap,
    middleware,
    routing::{get, post, put},
};

use crate::db::AppState;
use crate::error::Result;
use crate::middleware::{AuthContext, require_admin, require_staff};
use crate::models::AuditAction;
use crate::util::AuditLogBuilder;

/// Largest lesson video accepted in one upload.
pub const MAX_VIDEO_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Audit entry for a staff or admin mutation.
pub(crate) fn audit(
    state: &AppState,
    headers: &HeaderMap,
    ctx: &AuthContext,
    action: AuditAction,
    resource_type: &str,
    resource_id: &str,
    details: Option<serde_json::Value>,
) -> Result<()> {
    let conn = state.audit.get()?;
    let mut builder = AuditLogBuilder::new(&conn, state.audit_log_enabled, headers)
        .user(&ctx.user)
        .action(action)
        .resource(resource_type, resource_id);
    if let Some(ref details) = details {
        builder = builder.details(details);
    }
    builder.save()?;
    Ok(())
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // Course authoring (instructors own courses, admins any)
        .route("/admin/courses", get(list_courses).post(create_course))
        .route(
            "/admin/courses/{id}",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/admin/courses/{id}/publish", post(publish_course))
        .route("/admin/courses/{id}/unpublish", post(unpublish_course))
        .route("/admin/courses/{id}/modules", post(create_module))
        .route(
            "/admin/modules/{id}",
            put(update_module).delete(delete_module),
        )
        .route("/admin/modules/{id}/lessons", post(create_lesson))
        .route(
            "/admin/lessons/{id}",
            put(update_lesson).delete(delete_lesson),
        )
        .route(
            "/admin/lessons/{id}/video",
            put(upload_video)
                .delete(delete_video)
                .layer(DefaultBodyLimit::max(MAX_VIDEO_UPLOAD_BYTES)),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_staff))
        .merge(
            Router::new()
                // Users
                .route("/admin/users", get(list_users))
                .route("/admin/users/{id}/role", put(update_user_role))
                // Coupons
                .route("/admin/coupons", get(list_coupons).post(create_coupon))
                .route(
                    "/admin/coupons/{id}",
                    get(get_coupon).put(update_coupon).delete(delete_coupon),
                )
                // Purchases
                .route("/admin/purchases", get(list_purchases))
                .route(
                    "/admin/purchases/{id}/transactions",
                    get(list_purchase_transactions),
                )
                // Messaging
                .route("/admin/notifications", post(broadcast_notification))
                .route(
                    "/admin/newsletter/campaigns",
                    get(list_campaigns).post(create_campaign),
                )
                .route("/admin/newsletter/campaigns/{id}", get(get_campaign))
                .route("/admin/newsletter/campaigns/{id}/send", post(send_campaign))
                // Reports
                .route("/admin/reports/sales", get(sales_report))
                .route("/admin/reports/courses", get(course_report))
                .route("/admin/reports/coupons", get(coupon_report))
                .route("/admin/audit-logs", get(query_audit_logs))
                .route("/admin/audit-logs/text", get(query_audit_logs_text))
                .layer(middleware::from_fn_with_state(state, require_admin)),
        )
}
