use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::models::{
    AuditLogQuery, AuditLogResponse, CouponReportRow, CourseReportRow, ReportRange, SalesReport,
};
use crate::pagination::Paginated;

pub async fn sales_report(
    State(state): State<AppState>,
    Query(range): Query<ReportRange>,
) -> Result<Json<SalesReport>> {
    let conn = state.db.get()?;
    Ok(Json(queries::sales_report(&conn, &range)?))
}

pub async fn course_report(State(state): State<AppState>) -> Result<Json<Vec<CourseReportRow>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::course_report(&conn)?))
}

pub async fn coupon_report(State(state): State<AppState>) -> Result<Json<Vec<CouponReportRow>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::coupon_report(&conn)?))
}

pub async fn query_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Paginated<AuditLogResponse>>> {
    let conn = state.audit.get()?;
    let (logs, total) = queries::query_audit_logs(&conn, &query)?;
    let logs = logs.into_iter().map(AuditLogResponse::from).collect();
    Ok(Json(Paginated::new(logs, total, query.limit(), query.offset())))
}

/// Plain-text audit trail, one formatted line per entry.
pub async fn query_audit_logs_text(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> Result<String> {
    let conn = state.audit.get()?;
    let (logs, _) = queries::query_audit_logs(&conn, &query)?;
    Ok(logs
        .iter()
        .map(|log| log.formatted())
        .collect::<Vec<_>>()
        .join("\n"))
}
