use axum::extract::State;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{Purchase, PurchaseStatus, Transaction};
use crate::pagination::{Paginated, PaginationQuery};

#[derive(Debug, Deserialize)]
pub struct PurchaseListQuery {
    pub user_id: Option<String>,
    pub status: Option<PurchaseStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_purchases(
    State(state): State<AppState>,
    Query(query): Query<PurchaseListQuery>,
) -> Result<Json<Paginated<Purchase>>> {
    let page = PaginationQuery {
        limit: query.limit,
        offset: query.offset,
    };
    let conn = state.db.get()?;
    let (purchases, total) = queries::list_purchases_paginated(
        &conn,
        query.user_id.as_deref(),
        query.status,
        page.limit(),
        page.offset(),
    )?;
    Ok(Json(Paginated::from_query(purchases, total, &page)))
}

/// Ledger rows (payment and refund) recorded for a purchase.
pub async fn list_purchase_transactions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Transaction>>> {
    let conn = state.db.get()?;
    queries::get_purchase_by_id(&conn, &id)?.or_not_found(msg::PURCHASE_NOT_FOUND)?;
    Ok(Json(queries::list_transactions_for_purchase(&conn, &id)?))
}
