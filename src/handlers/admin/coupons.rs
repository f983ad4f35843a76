use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};

use super::audit;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::middleware::AuthContext;
use crate::models::{AuditAction, Coupon, CreateCoupon, UpdateCoupon};
use crate::pagination::{Paginated, PaginationQuery};

pub async fn create_coupon(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(input): Json<CreateCoupon>,
) -> Result<(StatusCode, Json<Coupon>)> {
    input.validate()?;
    let conn = state.db.get()?;

    if queries::coupon_code_exists(&conn, &input.code)? {
        return Err(AppError::Conflict("Coupon code already exists".into()));
    }
    if let Some(ref course_id) = input.course_id {
        queries::get_course_by_id(&conn, course_id)?.or_not_found(msg::COURSE_NOT_FOUND)?;
    }

    let coupon = queries::create_coupon(&conn, &input)?;

    audit(&state, &headers, &ctx, AuditAction::CreateCoupon, "coupon", &coupon.id, Some(serde_json::json!({
        "code": coupon.code,
        "kind": coupon.kind.as_ref(),
        "value": coupon.value,
        "max_uses": coupon.max_uses,
        "course_id": coupon.course_id,
    })))?;

    Ok((StatusCode::CREATED, Json(coupon)))
}

pub async fn list_coupons(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Paginated<Coupon>>> {
    let conn = state.db.get()?;
    let (coupons, total) = queries::list_coupons_paginated(&conn, query.limit(), query.offset())?;
    Ok(Json(Paginated::from_query(coupons, total, &query)))
}

pub async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Coupon>> {
    let conn = state.db.get()?;
    let coupon = queries::get_coupon_by_id(&conn, &id)?.or_not_found(msg::COUPON_NOT_FOUND)?;
    Ok(Json(coupon))
}

pub async fn update_coupon(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<UpdateCoupon>,
) -> Result<Json<Coupon>> {
    input.validate()?;
    let conn = state.db.get()?;
    let coupon = queries::update_coupon(&conn, &id, &input)?.or_not_found(msg::COUPON_NOT_FOUND)?;

    audit(&state, &headers, &ctx, AuditAction::UpdateCoupon, "coupon", &id, Some(serde_json::json!({
        "active": input.active,
        "max_uses": input.max_uses,
        "expires_at": input.expires_at,
    })))?;

    Ok(Json(coupon))
}

/// Coupons referenced by any purchase are deactivated rather than removed.
pub async fn delete_coupon(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let conn = state.db.get()?;
    let coupon = queries::get_coupon_by_id(&conn, &id)?.or_not_found(msg::COUPON_NOT_FOUND)?;

    let hard_deleted = queries::delete_coupon(&conn, &id)?;
    if !hard_deleted {
        queries::update_coupon(
            &conn,
            &id,
            &UpdateCoupon {
                active: Some(false),
                ..Default::default()
            },
        )?;
    }

    audit(&state, &headers, &ctx, AuditAction::DeleteCoupon, "coupon", &id, Some(serde_json::json!({
        "code": coupon.code,
        "hard_deleted": hard_deleted,
    })))?;

    Ok(StatusCode::NO_CONTENT)
}
