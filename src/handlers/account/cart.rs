use axum::{
    extract::{Extension, State},
    http::StatusCode,
};
use rusqlite::Connection;

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::AuthContext;
use crate::models::{AddCartItem, Cart, Coupon, QuoteRequest, QuoteResponse, normalize_coupon_code};
use crate::pricing;

pub async fn get_cart(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Cart>> {
    let conn = state.db.get()?;
    let items = queries::get_cart_items(&conn, ctx.user_id())?;
    Ok(Json(Cart::new(items)))
}

/// Adding a course that is already in the cart is a no-op.
pub async fn add_cart_item(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(input): Json<AddCartItem>,
) -> Result<(StatusCode, Json<Cart>)> {
    let conn = state.db.get()?;
    let course = queries::get_course_by_id(&conn, &input.course_id)?
        .or_not_found(msg::COURSE_NOT_FOUND)?;
    if !course.is_available() {
        return Err(AppError::BadRequest(msg::COURSE_NOT_PURCHASABLE.into()));
    }
    if queries::has_active_enrollment(&conn, ctx.user_id(), &course.id)? {
        return Err(AppError::Conflict(msg::ALREADY_ENROLLED.into()));
    }

    let added = queries::add_cart_item(&conn, ctx.user_id(), &course.id)?;
    let items = queries::get_cart_items(&conn, ctx.user_id())?;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(Cart::new(items))))
}

pub async fn remove_cart_item(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(course_id): Path<String>,
) -> Result<Json<Cart>> {
    let conn = state.db.get()?;
    queries::remove_cart_item(&conn, ctx.user_id(), &course_id)?;
    let items = queries::get_cart_items(&conn, ctx.user_id())?;
    Ok(Json(Cart::new(items)))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<StatusCode> {
    let conn = state.db.get()?;
    queries::clear_cart(&conn, ctx.user_id())?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resolve an optional coupon code entered by the customer.
pub(super) fn lookup_coupon(conn: &Connection, code: Option<&str>) -> Result<Option<Coupon>> {
    match code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => queries::get_coupon_by_code(conn, &normalize_coupon_code(code))?
            .or_not_found(msg::COUPON_NOT_FOUND)
            .map(Some),
        None => Ok(None),
    }
}

pub async fn quote_cart(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(input): Json<QuoteRequest>,
) -> Result<Json<QuoteResponse>> {
    let conn = state.db.get()?;
    let items = queries::get_cart_items(&conn, ctx.user_id())?;
    let coupon = lookup_coupon(&conn, input.coupon_code.as_deref())?;
    let quote = pricing::quote(&items, coupon.as_ref(), chrono::Utc::now().timestamp())?;
    Ok(Json(QuoteResponse { quote, items }))
}
