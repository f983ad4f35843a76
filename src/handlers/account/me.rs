use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::Json;
use crate::middleware::AuthContext;
use crate::models::{AuditAction, UpdateUser, User};
use crate::util::AuditLogBuilder;

pub async fn get_me(Extension(ctx): Extension<AuthContext>) -> Json<User> {
    Json(ctx.user)
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(input): Json<UpdateUser>,
) -> Result<Json<User>> {
    input.validate()?;
    let conn = state.db.get()?;
    let user = queries::update_user(&conn, ctx.user_id(), &input)?.or_not_found(msg::USER_NOT_FOUND)?;

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .user(&ctx.user)
        .action(AuditAction::UpdateProfile)
        .resource("user", &user.id)
        .details(&serde_json::json!({ "name": input.name }))
        .save()?;

    Ok(Json(user))
}
