use rusqlite::{Connection, params};

use super::{Filter, UpdateBuilder, now};
use crate::db::from_row::{
    CART_ITEM_COLS, COUPON_COLS, PURCHASE_COLS, PURCHASE_ITEM_COLS, TRANSACTION_COLS, query_all,
    query_one,
};
use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;
use crate::payments::PaymentProvider;

// ============ Cart ============

/// Cart lines whose course is still purchasable. Lines pointing at courses that
/// were unpublished since are hidden rather than deleted.
pub fn get_cart_items(conn: &Connection, user_id: &str) -> Result<Vec<CartItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM cart_items c JOIN courses co ON co.id = c.course_id
             WHERE c.user_id = ?1 AND co.published = 1 AND co.deleted_at IS NULL
             ORDER BY c.added_at, co.title",
            CART_ITEM_COLS
        ),
        &[&user_id],
    )
}

/// Idempotent; re-adding keeps the original `added_at`.
pub fn add_cart_item(conn: &Connection, user_id: &str, course_id: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO cart_items (user_id, course_id, added_at) VALUES (?1, ?2, ?3)",
        params![user_id, course_id, now()],
    )?;
    Ok(inserted > 0)
}

pub fn remove_cart_item(conn: &Connection, user_id: &str, course_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM cart_items WHERE user_id = ?1 AND course_id = ?2",
        params![user_id, course_id],
    )?;
    Ok(deleted > 0)
}

pub fn clear_cart(conn: &Connection, user_id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM cart_items WHERE user_id = ?1", params![user_id])?)
}

// ============ Coupons ============

pub fn create_coupon(conn: &Connection, input: &CreateCoupon) -> Result<Coupon> {
    let id = EntityType::Coupon.gen_id();
    let now = now();
    let code = normalize_coupon_code(&input.code);
    let currency = match input.kind {
        CouponKind::Fixed => input.currency.as_ref().map(|c| c.to_lowercase()),
        CouponKind::Percentage => None,
    };

    conn.execute(
        "INSERT INTO coupons (id, code, kind, value, currency, max_uses, used_count, expires_at, course_id, active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?10, ?11)",
        params![
            &id,
            &code,
            input.kind.as_ref(),
            input.value,
            &currency,
            input.max_uses,
            input.expires_at,
            &input.course_id,
            input.active as i64,
            now,
            now
        ],
    )?;

    Ok(Coupon {
        id,
        code,
        kind: input.kind,
        value: input.value,
        currency,
        max_uses: input.max_uses,
        used_count: 0,
        expires_at: input.expires_at,
        course_id: input.course_id.clone(),
        active: input.active,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_coupon_by_id(conn: &Connection, id: &str) -> Result<Option<Coupon>> {
    query_one(
        conn,
        &format!("SELECT {} FROM coupons WHERE id = ?1", COUPON_COLS),
        &[&id],
    )
}

pub fn get_coupon_by_code(conn: &Connection, code: &str) -> Result<Option<Coupon>> {
    let code = normalize_coupon_code(code);
    query_one(
        conn,
        &format!("SELECT {} FROM coupons WHERE code = ?1", COUPON_COLS),
        &[&code],
    )
}

pub fn coupon_code_exists(conn: &Connection, code: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM coupons WHERE code = ?1)",
        params![normalize_coupon_code(code)],
        |row| row.get(0),
    )?)
}

pub fn list_coupons_paginated(conn: &Connection, limit: i64, offset: i64) -> Result<(Vec<Coupon>, i64)> {
    Filter::default().paginate(conn, COUPON_COLS, "coupons", "created_at DESC", limit, offset)
}

pub fn update_coupon(conn: &Connection, id: &str, input: &UpdateCoupon) -> Result<Option<Coupon>> {
    let mut builder = UpdateBuilder::new("coupons", id)
        .with_updated_at()
        .set_opt("active", input.active.map(|a| a as i64));
    if let Some(max_uses) = input.max_uses {
        builder = builder.set_nullable("max_uses", max_uses);
    }
    if let Some(expires_at) = input.expires_at {
        builder = builder.set_nullable("expires_at", expires_at);
    }
    match builder.execute_returning(conn, COUPON_COLS)? {
        Some(coupon) => Ok(Some(coupon)),
        None => get_coupon_by_id(conn, id),
    }
}

/// Remove a coupon nothing points at. Returns false when it has been
/// redeemed or any purchase, pending ones included, references it; pending
/// purchases still need the row to count the redemption on payment.
pub fn delete_coupon(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM coupons
         WHERE id = ?1 AND used_count = 0
           AND NOT EXISTS (SELECT 1 FROM purchases WHERE coupon_id = ?1)",
        params![id],
    )?;
    Ok(deleted > 0)
}

/// Count one redemption. The purchase was priced while the coupon was valid,
/// so the increment is unconditional.
pub fn increment_coupon_usage(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE coupons SET used_count = used_count + 1, updated_at = ?1 WHERE id = ?2",
        params![now(), id],
    )?;
    Ok(())
}

// ============ Purchases ============

/// Insert a pending purchase and its item snapshot. Call inside a transaction.
pub fn create_purchase(conn: &Connection, input: &CreatePurchase) -> Result<PurchaseWithItems> {
    let id = EntityType::Purchase.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO purchases (id, user_id, status, currency, subtotal_cents, discount_cents, total_cents, coupon_id, coupon_code, provider, created_at, updated_at)
         VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &id,
            &input.user_id,
            &input.currency,
            input.subtotal_cents,
            input.discount_cents,
            input.total_cents,
            &input.coupon_id,
            &input.coupon_code,
            input.provider.as_ref(),
            now,
            now
        ],
    )?;

    let mut items = Vec::with_capacity(input.items.len());
    for (course_id, title, price_cents) in &input.items {
        let item_id = EntityType::PurchaseItem.gen_id();
        conn.execute(
            "INSERT INTO purchase_items (id, purchase_id, course_id, title, price_cents)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&item_id, &id, course_id, title, price_cents],
        )?;
        items.push(PurchaseItem {
            id: item_id,
            purchase_id: id.clone(),
            course_id: course_id.clone(),
            title: title.clone(),
            price_cents: *price_cents,
        });
    }

    Ok(PurchaseWithItems {
        purchase: Purchase {
            id,
            user_id: input.user_id.clone(),
            status: PurchaseStatus::Pending,
            currency: input.currency.clone(),
            subtotal_cents: input.subtotal_cents,
            discount_cents: input.discount_cents,
            total_cents: input.total_cents,
            coupon_id: input.coupon_id.clone(),
            coupon_code: input.coupon_code.clone(),
            provider: input.provider,
            provider_checkout_id: None,
            provider_payment_id: None,
            provider_merchant_order_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            refunded_at: None,
        },
        items,
    })
}

pub fn get_purchase_by_id(conn: &Connection, id: &str) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!("SELECT {} FROM purchases WHERE id = ?1", PURCHASE_COLS),
        &[&id],
    )
}

pub fn get_purchase_items(conn: &Connection, purchase_id: &str) -> Result<Vec<PurchaseItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM purchase_items WHERE purchase_id = ?1 ORDER BY title",
            PURCHASE_ITEM_COLS
        ),
        &[&purchase_id],
    )
}

pub fn get_purchase_with_items(conn: &Connection, id: &str) -> Result<Option<PurchaseWithItems>> {
    let Some(purchase) = get_purchase_by_id(conn, id)? else {
        return Ok(None);
    };
    let items = get_purchase_items(conn, id)?;
    Ok(Some(PurchaseWithItems { purchase, items }))
}

/// `user_id = None` lists every user's purchases (admins).
pub fn list_purchases_paginated(
    conn: &Connection,
    user_id: Option<&str>,
    status: Option<PurchaseStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Purchase>, i64)> {
    let mut filter = Filter::default();
    filter.push_opt("user_id = ?", user_id.map(String::from));
    filter.push_opt("status = ?", status.map(|s| s.as_ref().to_string()));
    filter.paginate(conn, PURCHASE_COLS, "purchases", "created_at DESC", limit, offset)
}

pub fn set_purchase_checkout_id(conn: &Connection, id: &str, checkout_id: &str) -> Result<()> {
    UpdateBuilder::new("purchases", id)
        .with_updated_at()
        .set("provider_checkout_id", checkout_id.to_string())
        .execute(conn)?;
    Ok(())
}

pub fn find_purchase_by_payment_id(
    conn: &Connection,
    provider: PaymentProvider,
    payment_id: &str,
) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE provider = ?1 AND provider_payment_id = ?2",
            PURCHASE_COLS
        ),
        &[&provider.as_ref(), &payment_id],
    )
}

pub fn find_purchase_by_checkout_id(
    conn: &Connection,
    provider: PaymentProvider,
    checkout_id: &str,
) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE provider = ?1 AND provider_checkout_id = ?2",
            PURCHASE_COLS
        ),
        &[&provider.as_ref(), &checkout_id],
    )
}

pub fn find_purchase_by_merchant_order_id(
    conn: &Connection,
    provider: PaymentProvider,
    merchant_order_id: &str,
) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE provider = ?1 AND provider_merchant_order_id = ?2",
            PURCHASE_COLS
        ),
        &[&provider.as_ref(), &merchant_order_id],
    )
}

/// Gateway identifiers learned from a notification.
#[derive(Debug, Clone, Default)]
pub struct GatewayRefs<'a> {
    pub payment_id: Option<&'a str>,
    pub merchant_order_id: Option<&'a str>,
    pub failure_reason: Option<&'a str>,
}

/// Compare-and-swap status change.
///
/// Only matches when the current status is one `next` may be entered from,
/// so among concurrent deliveries exactly one caller sees `true` and runs
/// the side effects.
pub fn transition_purchase_status(
    conn: &Connection,
    id: &str,
    next: PurchaseStatus,
    refs: &GatewayRefs<'_>,
) -> Result<bool> {
    let sources: Vec<String> = PurchaseStatus::allowed_sources(next)
        .iter()
        .map(|s| format!("'{}'", s.as_ref()))
        .collect();
    if sources.is_empty() {
        return Ok(false);
    }

    let now = now();
    let (paid_at, refunded_at) = match next {
        PurchaseStatus::Paid => (Some(now), None),
        PurchaseStatus::Refunded => (None, Some(now)),
        _ => (None, None),
    };

    let sql = format!(
        "UPDATE purchases SET
            status = ?1,
            updated_at = ?2,
            provider_payment_id = COALESCE(?3, provider_payment_id),
            provider_merchant_order_id = COALESCE(?4, provider_merchant_order_id),
            failure_reason = CASE WHEN ?1 = 'failed' THEN ?5 WHEN ?1 = 'paid' THEN NULL ELSE failure_reason END,
            paid_at = COALESCE(?6, paid_at),
            refunded_at = COALESCE(?7, refunded_at)
         WHERE id = ?8 AND status IN ({})",
        sources.join(", ")
    );
    let affected = conn.execute(
        &sql,
        params![
            next.as_ref(),
            now,
            refs.payment_id,
            refs.merchant_order_id,
            refs.failure_reason,
            paid_at,
            refunded_at,
            id
        ],
    )?;
    Ok(affected > 0)
}

/// Fail pending purchases older than `max_age_secs`. Returns their ids.
pub fn expire_stale_purchases(conn: &Connection, max_age_secs: i64) -> Result<Vec<String>> {
    let now = now();
    let mut stmt = conn.prepare(
        "UPDATE purchases SET status = 'failed', failure_reason = 'expired', updated_at = ?1
         WHERE status = 'pending' AND created_at < ?2
         RETURNING id",
    )?;
    let ids = stmt
        .query_map(params![now, now - max_age_secs], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

// ============ Transactions ============

pub fn create_transaction(conn: &Connection, input: &CreateTransaction) -> Result<Transaction> {
    let id = EntityType::Transaction.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO transactions (id, purchase_id, user_id, provider, provider_payment_id, currency, subtotal_cents, discount_cents, total_cents, coupon_code, transaction_type, parent_transaction_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            &id,
            &input.purchase_id,
            &input.user_id,
            input.provider.as_ref(),
            &input.provider_payment_id,
            &input.currency,
            input.subtotal_cents,
            input.discount_cents,
            input.total_cents,
            &input.coupon_code,
            input.transaction_type.as_str(),
            &input.parent_transaction_id,
            now
        ],
    )?;

    Ok(Transaction {
        id,
        purchase_id: input.purchase_id.clone(),
        user_id: input.user_id.clone(),
        provider: input.provider,
        provider_payment_id: input.provider_payment_id.clone(),
        currency: input.currency.clone(),
        subtotal_cents: input.subtotal_cents,
        discount_cents: input.discount_cents,
        total_cents: input.total_cents,
        coupon_code: input.coupon_code.clone(),
        transaction_type: input.transaction_type,
        parent_transaction_id: input.parent_transaction_id.clone(),
        created_at: now,
    })
}

pub fn list_transactions_for_purchase(conn: &Connection, purchase_id: &str) -> Result<Vec<Transaction>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE purchase_id = ?1 ORDER BY created_at, rowid",
            TRANSACTION_COLS
        ),
        &[&purchase_id],
    )
}

/// The positive `purchase` row a refund should point at.
pub fn get_purchase_transaction(conn: &Connection, purchase_id: &str) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE purchase_id = ?1 AND transaction_type = 'purchase'
             ORDER BY created_at DESC LIMIT 1",
            TRANSACTION_COLS
        ),
        &[&purchase_id],
    )
}

// ============ Webhook Event Deduplication ============

/// Atomically record a webhook event, returning true if this is a new event.
/// Returns false if the event was already processed.
///
/// Uses INSERT OR IGNORE for atomicity - if the (provider, event_id) pair
/// already exists, the insert is silently ignored and we return false.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (provider, event_id, created_at) VALUES (?1, ?2, ?3)",
        params![provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

/// Purge old webhook events beyond the retention period.
/// Gateways stop retrying after a few days, so old rows only cost space.
pub fn purge_old_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}
