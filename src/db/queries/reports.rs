use rusqlite::{Connection, params};

use super::Filter;
use crate::error::Result;
use crate::models::*;
use crate::progress::completion_percentage;

/// Revenue per currency from the transactions ledger. Refund rows carry
/// negative totals, so they are reported as absolute values.
pub fn sales_report(conn: &Connection, range: &ReportRange) -> Result<SalesReport> {
    let mut filter = Filter::default();
    filter.push_opt("created_at >= ?", range.start_date);
    filter.push_opt("created_at <= ?", range.end_date);

    let sql = format!(
        "SELECT currency,
                COALESCE(SUM(CASE WHEN transaction_type = 'purchase' THEN total_cents END), 0),
                COALESCE(SUM(CASE WHEN transaction_type = 'refund' THEN -total_cents END), 0),
                COALESCE(SUM(CASE WHEN transaction_type = 'purchase' THEN discount_cents END), 0),
                COUNT(CASE WHEN transaction_type = 'purchase' THEN 1 END),
                COUNT(CASE WHEN transaction_type = 'refund' THEN 1 END)
         FROM transactions {}
         GROUP BY currency
         ORDER BY currency",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let by_currency = stmt
        .query_map(rusqlite::params_from_iter(filter.params.iter()), |row| {
            let gross_cents: i64 = row.get(1)?;
            let refunded_cents: i64 = row.get(2)?;
            Ok(CurrencySales {
                currency: row.get(0)?,
                gross_cents,
                refunded_cents,
                net_cents: gross_cents - refunded_cents,
                discount_cents: row.get(3)?,
                purchase_count: row.get(4)?,
                refund_count: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(SalesReport {
        start_date: range.start_date,
        end_date: range.end_date,
        by_currency,
    })
}

/// Per-course enrollment, completion and revenue figures. Revenue is what
/// was charged for the course in purchases that are still paid, so refunded
/// purchases drop out. A course-scoped coupon discounts only its course;
/// a cart-wide one is split across items by list price.
pub fn course_report(conn: &Connection) -> Result<Vec<CourseReportRow>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.title, c.currency,
                (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id AND e.revoked_at IS NULL),
                (SELECT COUNT(*) FROM certificates cert WHERE cert.course_id = c.id),
                (SELECT COALESCE(SUM(pi.price_cents - CASE
                            WHEN p.discount_cents = 0 THEN 0
                            WHEN cp.course_id IS NOT NULL THEN
                                CASE WHEN cp.course_id = pi.course_id THEN p.discount_cents ELSE 0 END
                            WHEN p.subtotal_cents > 0 THEN p.discount_cents * pi.price_cents / p.subtotal_cents
                            ELSE 0
                        END), 0)
                   FROM purchase_items pi
                   JOIN purchases p ON p.id = pi.purchase_id
                   LEFT JOIN coupons cp ON cp.id = p.coupon_id
                  WHERE pi.course_id = c.id AND p.status = 'paid'),
                (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id)
         FROM courses c
         WHERE c.deleted_at IS NULL
         ORDER BY c.created_at",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                CourseReportRow {
                    course_id: row.get(0)?,
                    title: row.get(1)?,
                    currency: row.get(2)?,
                    active_enrollments: row.get(3)?,
                    completions: row.get(4)?,
                    revenue_cents: row.get(5)?,
                    average_progress: 0,
                },
                row.get::<_, i64>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut per_student = conn.prepare(
        "SELECT COUNT(lp.lesson_id)
         FROM enrollments e
         LEFT JOIN lesson_progress lp
           ON lp.user_id = e.user_id AND lp.course_id = e.course_id AND lp.completed = 1
         WHERE e.course_id = ?1 AND e.revoked_at IS NULL
         GROUP BY e.user_id",
    )?;

    let mut report = Vec::with_capacity(rows.len());
    for (mut row, total_lessons) in rows {
        let completed: Vec<i64> = per_student
            .query_map(params![&row.course_id], |r| r.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if !completed.is_empty() {
            let sum: i64 = completed
                .iter()
                .map(|&done| completion_percentage(done, total_lessons))
                .sum();
            row.average_progress = sum / completed.len() as i64;
        }
        report.push(row);
    }
    Ok(report)
}

pub fn coupon_report(conn: &Connection) -> Result<Vec<CouponReportRow>> {
    let mut stmt = conn.prepare(
        "SELECT cp.id, cp.code, cp.used_count, cp.max_uses,
                (SELECT COALESCE(SUM(p.discount_cents), 0) FROM purchases p
                  WHERE p.coupon_id = cp.id AND p.status = 'paid'),
                cp.active
         FROM coupons cp
         ORDER BY cp.created_at",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CouponReportRow {
                coupon_id: row.get(0)?,
                code: row.get(1)?,
                used_count: row.get(2)?,
                max_uses: row.get(3)?,
                discount_given_cents: row.get(4)?,
                active: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
