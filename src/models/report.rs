use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ReportRange {
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
}

/// Revenue statistics for a single currency
#[derive(Debug, Clone, Serialize)]
pub struct CurrencySales {
    /// ISO 4217 currency code (lowercase)
    pub currency: String,
    /// Sum of purchase totals
    pub gross_cents: i64,
    /// Absolute value of refunded totals
    pub refunded_cents: i64,
    /// gross - refunded
    pub net_cents: i64,
    pub discount_cents: i64,
    pub purchase_count: i64,
    pub refund_count: i64,
}

/// Amounts cannot be summed across currencies.
#[derive(Debug, Clone, Serialize)]
pub struct SalesReport {
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub by_currency: Vec<CurrencySales>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseReportRow {
    pub course_id: String,
    pub title: String,
    pub currency: String,
    pub active_enrollments: i64,
    pub completions: i64,
    /// Net of refunds
    pub revenue_cents: i64,
    pub average_progress: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CouponReportRow {
    pub coupon_id: String,
    pub code: String,
    pub used_count: i64,
    pub max_uses: Option<i64>,
    pub discount_given_cents: i64,
    pub active: bool,
}
