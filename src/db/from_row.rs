//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models can implement to
//! define how they are constructed from database rows, plus helper functions
//! for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;
use crate::payments::PaymentProvider;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// This provides graceful error handling instead of panicking when database
/// contains invalid enum values (from corruption, manual edits, etc.).
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

fn parse_bool(row: &Row, col: usize) -> rusqlite::Result<bool> {
    Ok(row.get::<_, i32>(col)? != 0)
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, email, name, role, created_at, updated_at, deleted_at";

pub const COURSE_COLS: &str = "id, slug, title, subtitle, description, instructor_id, price_cents, currency, level, thumbnail_url, published, created_at, updated_at, deleted_at";

pub const MODULE_COLS: &str = "id, course_id, title, position, created_at";

pub const LESSON_COLS: &str = "id, module_id, course_id, title, content, video_blob, video_content_type, video_size, duration_seconds, is_preview, position, created_at, updated_at";

/// Cart lines joined with their course (`c` = cart_items, `co` = courses)
pub const CART_ITEM_COLS: &str =
    "co.id, co.slug, co.title, co.price_cents, co.currency, c.added_at";

pub const COUPON_COLS: &str = "id, code, kind, value, currency, max_uses, used_count, expires_at, course_id, active, created_at, updated_at";

pub const PURCHASE_COLS: &str = "id, user_id, status, currency, subtotal_cents, discount_cents, total_cents, coupon_id, coupon_code, provider, provider_checkout_id, provider_payment_id, provider_merchant_order_id, failure_reason, created_at, updated_at, paid_at, refunded_at";

pub const PURCHASE_ITEM_COLS: &str = "id, purchase_id, course_id, title, price_cents";

pub const ENROLLMENT_COLS: &str = "id, user_id, course_id, purchase_id, created_at, revoked_at";

pub const TRANSACTION_COLS: &str = "id, purchase_id, user_id, provider, provider_payment_id, currency, subtotal_cents, discount_cents, total_cents, coupon_code, transaction_type, parent_transaction_id, created_at";

pub const LESSON_PROGRESS_COLS: &str =
    "user_id, lesson_id, course_id, watched_seconds, completed, completed_at, updated_at";

pub const CERTIFICATE_COLS: &str =
    "id, user_id, course_id, verification_code, student_name, course_title, issued_at";

pub const NOTIFICATION_COLS: &str = "id, user_id, kind, title, body, link, read_at, created_at";

pub const SUBSCRIBER_COLS: &str =
    "id, email, unsubscribe_token, subscribed_at, unsubscribed_at";

pub const CAMPAIGN_COLS: &str = "id, subject, body, status, total_recipients, sent_count, failed_count, created_by, created_at, started_at, completed_at";

pub const CONVERSATION_COLS: &str = "id, user_id, subject, status, created_at, updated_at";

pub const MESSAGE_COLS: &str = "id, conversation_id, sender_id, body, created_at";

pub const AUDIT_LOG_COLS: &str = "id, timestamp, actor_type, user_id, user_email, action, resource_type, resource_id, details, ip_address, user_agent";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: parse_enum(row, 3, "role")?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            deleted_at: row.get(6)?,
        })
    }
}

impl FromRow for Course {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Course {
            id: row.get(0)?,
            slug: row.get(1)?,
            title: row.get(2)?,
            subtitle: row.get(3)?,
            description: row.get(4)?,
            instructor_id: row.get(5)?,
            price_cents: row.get(6)?,
            currency: row.get(7)?,
            level: parse_enum(row, 8, "level")?,
            thumbnail_url: row.get(9)?,
            published: parse_bool(row, 10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            deleted_at: row.get(13)?,
        })
    }
}

impl FromRow for CourseModule {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CourseModule {
            id: row.get(0)?,
            course_id: row.get(1)?,
            title: row.get(2)?,
            position: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for Lesson {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Lesson {
            id: row.get(0)?,
            module_id: row.get(1)?,
            course_id: row.get(2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            video_blob: row.get(5)?,
            video_content_type: row.get(6)?,
            video_size: row.get(7)?,
            duration_seconds: row.get(8)?,
            is_preview: parse_bool(row, 9)?,
            position: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

impl FromRow for CartItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CartItem {
            course_id: row.get(0)?,
            slug: row.get(1)?,
            title: row.get(2)?,
            price_cents: row.get(3)?,
            currency: row.get(4)?,
            added_at: row.get(5)?,
        })
    }
}

impl FromRow for Coupon {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Coupon {
            id: row.get(0)?,
            code: row.get(1)?,
            kind: parse_enum(row, 2, "kind")?,
            value: row.get(3)?,
            currency: row.get(4)?,
            max_uses: row.get(5)?,
            used_count: row.get(6)?,
            expires_at: row.get(7)?,
            course_id: row.get(8)?,
            active: parse_bool(row, 9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FromRow for Purchase {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Purchase {
            id: row.get(0)?,
            user_id: row.get(1)?,
            status: parse_enum(row, 2, "status")?,
            currency: row.get(3)?,
            subtotal_cents: row.get(4)?,
            discount_cents: row.get(5)?,
            total_cents: row.get(6)?,
            coupon_id: row.get(7)?,
            coupon_code: row.get(8)?,
            provider: parse_enum::<PaymentProvider>(row, 9, "provider")?,
            provider_checkout_id: row.get(10)?,
            provider_payment_id: row.get(11)?,
            provider_merchant_order_id: row.get(12)?,
            failure_reason: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
            paid_at: row.get(16)?,
            refunded_at: row.get(17)?,
        })
    }
}

impl FromRow for PurchaseItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PurchaseItem {
            id: row.get(0)?,
            purchase_id: row.get(1)?,
            course_id: row.get(2)?,
            title: row.get(3)?,
            price_cents: row.get(4)?,
        })
    }
}

impl FromRow for Enrollment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Enrollment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            purchase_id: row.get(3)?,
            created_at: row.get(4)?,
            revoked_at: row.get(5)?,
        })
    }
}

impl FromRow for Transaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let transaction_type: String = row.get(10)?;
        Ok(Transaction {
            id: row.get(0)?,
            purchase_id: row.get(1)?,
            user_id: row.get(2)?,
            provider: parse_enum::<PaymentProvider>(row, 3, "provider")?,
            provider_payment_id: row.get(4)?,
            currency: row.get(5)?,
            subtotal_cents: row.get(6)?,
            discount_cents: row.get(7)?,
            total_cents: row.get(8)?,
            coupon_code: row.get(9)?,
            transaction_type: TransactionType::from_str(&transaction_type).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(
                    10,
                    "transaction_type".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            parent_transaction_id: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

impl FromRow for LessonProgress {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LessonProgress {
            user_id: row.get(0)?,
            lesson_id: row.get(1)?,
            course_id: row.get(2)?,
            watched_seconds: row.get(3)?,
            completed: parse_bool(row, 4)?,
            completed_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for Certificate {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Certificate {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            verification_code: row.get(3)?,
            student_name: row.get(4)?,
            course_title: row.get(5)?,
            issued_at: row.get(6)?,
        })
    }
}

impl FromRow for Notification {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Notification {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: parse_enum(row, 2, "kind")?,
            title: row.get(3)?,
            body: row.get(4)?,
            link: row.get(5)?,
            read_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for Subscriber {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscriber {
            id: row.get(0)?,
            email: row.get(1)?,
            unsubscribe_token: row.get(2)?,
            subscribed_at: row.get(3)?,
            unsubscribed_at: row.get(4)?,
        })
    }
}

impl FromRow for Campaign {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Campaign {
            id: row.get(0)?,
            subject: row.get(1)?,
            body: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            total_recipients: row.get(4)?,
            sent_count: row.get(5)?,
            failed_count: row.get(6)?,
            created_by: row.get(7)?,
            created_at: row.get(8)?,
            started_at: row.get(9)?,
            completed_at: row.get(10)?,
        })
    }
}

impl FromRow for SupportConversation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SupportConversation {
            id: row.get(0)?,
            user_id: row.get(1)?,
            subject: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl FromRow for SupportMessage {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SupportMessage {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sender_id: row.get(2)?,
            body: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for AuditLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let details: Option<String> = row.get(8)?;
        Ok(AuditLog {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            actor_type: parse_enum(row, 2, "actor_type")?,
            user_id: row.get(3)?,
            user_email: row.get(4)?,
            action: row.get(5)?,
            resource_type: row.get(6)?,
            resource_id: row.get(7)?,
            details: details.and_then(|d| serde_json::from_str(&d).ok()),
            ip_address: row.get(9)?,
            user_agent: row.get(10)?,
        })
    }
}
