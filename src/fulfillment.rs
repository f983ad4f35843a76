//! Purchase state changes and their side effects.
//!
//! Every path that moves a purchase (webhooks, free checkout, expiry) goes
//! through [`apply_outcome`], which runs the status change and all
//! database side effects in one IMMEDIATE transaction. Only the caller whose
//! compare-and-swap wins gets a [`Transition`] back, so the post-commit
//! effects in [`after_commit`] run exactly once per state change.

use rusqlite::{Connection, TransactionBehavior};

use crate::db::AppState;
use crate::db::queries::{self, GatewayRefs};
use crate::email::{EmailMessage, format_amount};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{
    AuditAction, CreateTransaction, NewNotification, NotificationKind, PurchaseStatus,
    PurchaseWithItems, TransactionType,
};
use crate::util::AuditLogBuilder;

/// Failure reason recorded when the gateway charged a different amount.
pub const AMOUNT_MISMATCH: &str = "amount_mismatch";

/// What a gateway (or the system) says happened to a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Money captured. Amount and currency are checked against the purchase
    /// when the gateway reports them.
    Succeeded {
        amount_cents: Option<i64>,
        currency: Option<String>,
    },
    Failed { reason: String },
    Refunded,
}

impl PaymentOutcome {
    pub fn target_status(&self) -> PurchaseStatus {
        match self {
            Self::Succeeded { .. } => PurchaseStatus::Paid,
            Self::Failed { .. } => PurchaseStatus::Failed,
            Self::Refunded => PurchaseStatus::Refunded,
        }
    }
}

/// Replay-protection key recorded in the same transaction as the change.
#[derive(Debug, Clone, Copy)]
pub struct EventKey<'a> {
    pub provider: &'a str,
    pub event_id: &'a str,
}

/// A status change that committed.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: PurchaseStatus,
    pub to: PurchaseStatus,
    pub purchase: PurchaseWithItems,
    /// Set when a succeeded payment was downgraded to a failure
    pub amount_mismatch: bool,
}

#[derive(Debug, Clone)]
pub enum ApplyResult {
    Applied(Transition),
    /// The event key was already recorded
    Duplicate,
    /// The purchase is in a state the outcome cannot move it from
    NotAllowed { current: PurchaseStatus },
}

/// Downgrade a success whose amount or currency differs from the purchase.
fn check_amount(purchase: &PurchaseWithItems, outcome: PaymentOutcome) -> (PaymentOutcome, bool) {
    if let PaymentOutcome::Succeeded {
        amount_cents,
        currency,
    } = &outcome
    {
        let p = &purchase.purchase;
        let amount_ok = amount_cents.is_none_or(|a| a == p.total_cents);
        let currency_ok = currency
            .as_deref()
            .is_none_or(|c| c.eq_ignore_ascii_case(&p.currency));
        if !(amount_ok && currency_ok) {
            tracing::warn!(
                purchase_id = %p.id,
                expected = p.total_cents,
                expected_currency = %p.currency,
                reported = ?amount_cents,
                reported_currency = ?currency,
                "Payment amount mismatch, marking purchase failed"
            );
            return (
                PaymentOutcome::Failed {
                    reason: AMOUNT_MISMATCH.to_string(),
                },
                true,
            );
        }
    }
    (outcome, false)
}

/// Apply an outcome to a purchase atomically.
///
/// Inside one transaction: record the event key (if any), compare-and-swap the
/// status, persist gateway ids, and run the paid/refund bookkeeping. A
/// not-allowed transition still commits the event key, so the same
/// notification is not re-evaluated.
pub fn apply_outcome(
    conn: &mut Connection,
    purchase_id: &str,
    event: Option<EventKey<'_>>,
    outcome: PaymentOutcome,
    refs: &GatewayRefs<'_>,
) -> Result<ApplyResult> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(key) = event
        && !queries::try_record_webhook_event(&tx, key.provider, key.event_id)?
    {
        return Ok(ApplyResult::Duplicate);
    }

    let before = queries::get_purchase_with_items(&tx, purchase_id)?
        .or_not_found(msg::PURCHASE_NOT_FOUND)?;
    let from = before.purchase.status;

    let (outcome, amount_mismatch) = check_amount(&before, outcome);
    let to = outcome.target_status();
    let refs = GatewayRefs {
        failure_reason: match &outcome {
            PaymentOutcome::Failed { reason } => Some(reason.as_str()),
            _ => refs.failure_reason,
        },
        ..refs.clone()
    };

    if !queries::transition_purchase_status(&tx, purchase_id, to, &refs)? {
        tx.commit()?;
        return Ok(ApplyResult::NotAllowed { current: from });
    }

    let purchase = queries::get_purchase_with_items(&tx, purchase_id)?
        .or_not_found(msg::PURCHASE_NOT_FOUND)?;
    let p = &purchase.purchase;

    match to {
        PurchaseStatus::Paid => {
            for item in &purchase.items {
                queries::grant_enrollment(&tx, &p.user_id, &item.course_id, Some(&p.id))?;
                queries::remove_cart_item(&tx, &p.user_id, &item.course_id)?;
            }
            if let Some(coupon_id) = &p.coupon_id {
                queries::increment_coupon_usage(&tx, coupon_id)?;
            }
            queries::create_transaction(
                &tx,
                &CreateTransaction {
                    purchase_id: p.id.clone(),
                    user_id: p.user_id.clone(),
                    provider: p.provider,
                    provider_payment_id: p.provider_payment_id.clone(),
                    currency: p.currency.clone(),
                    subtotal_cents: p.subtotal_cents,
                    discount_cents: p.discount_cents,
                    total_cents: p.total_cents,
                    coupon_code: p.coupon_code.clone(),
                    transaction_type: TransactionType::Purchase,
                    parent_transaction_id: None,
                },
            )?;
        }
        // Nothing was granted unless the purchase had been paid
        PurchaseStatus::Refunded if from == PurchaseStatus::Paid => {
            queries::revoke_enrollments_for_purchase(&tx, &p.id)?;
            let parent = queries::get_purchase_transaction(&tx, &p.id)?;
            queries::create_transaction(
                &tx,
                &CreateTransaction {
                    purchase_id: p.id.clone(),
                    user_id: p.user_id.clone(),
                    provider: p.provider,
                    provider_payment_id: p.provider_payment_id.clone(),
                    currency: p.currency.clone(),
                    subtotal_cents: -p.subtotal_cents,
                    discount_cents: -p.discount_cents,
                    total_cents: -p.total_cents,
                    coupon_code: p.coupon_code.clone(),
                    transaction_type: TransactionType::Refund,
                    parent_transaction_id: parent.map(|t| t.id),
                },
            )?;
        }
        _ => {}
    }

    tx.commit()?;

    Ok(ApplyResult::Applied(Transition {
        from,
        to,
        purchase,
        amount_mismatch,
    }))
}

/// Side effects that must not hold the database transaction:
/// in-app notification, email and audit entry.
pub fn after_commit(state: &AppState, transition: &Transition, source: &str) {
    let p = &transition.purchase.purchase;

    let notification = match transition.to {
        PurchaseStatus::Paid => Some(NewNotification {
            kind: NotificationKind::PurchaseCompleted,
            title: "Purchase complete".to_string(),
            body: format!(
                "Your payment of {} was received. Your courses are ready.",
                format_amount(p.total_cents, &p.currency)
            ),
            link: Some("/learn/courses".to_string()),
        }),
        PurchaseStatus::Refunded if transition.from == PurchaseStatus::Paid => {
            Some(NewNotification {
                kind: NotificationKind::PurchaseRefunded,
                title: "Purchase refunded".to_string(),
                body: format!(
                    "Your purchase of {} was refunded and access to its courses was removed.",
                    format_amount(p.total_cents, &p.currency)
                ),
                link: Some(format!("/purchases/{}", p.id)),
            })
        }
        _ => None,
    };

    if let Some(notification) = notification
        && let Err(e) = notify_users(state, std::slice::from_ref(&p.user_id), &notification)
    {
        tracing::warn!(purchase_id = %p.id, "Failed to store purchase notification: {}", e);
    }

    if transition.to == PurchaseStatus::Paid {
        match state
            .db
            .get()
            .map_err(AppError::from)
            .and_then(|conn| queries::get_user_by_id(&conn, &p.user_id))
        {
            Ok(Some(user)) => state.email_service.send_in_background(
                EmailMessage::purchase_receipt(&user.email, &transition.purchase, &state.base_url),
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(purchase_id = %p.id, "Failed to load buyer for receipt: {}", e),
        }
    }

    let action = match transition.to {
        PurchaseStatus::Paid => AuditAction::MarkPurchasePaid,
        PurchaseStatus::Refunded => AuditAction::RefundPurchase,
        PurchaseStatus::Failed if p.failure_reason.as_deref() == Some("expired") => {
            AuditAction::ExpirePurchase
        }
        _ => AuditAction::MarkPurchaseFailed,
    };
    let details = serde_json::json!({
        "source": source,
        "from": transition.from.as_ref(),
        "to": transition.to.as_ref(),
        "provider": p.provider.as_ref(),
        "provider_payment_id": p.provider_payment_id,
        "total_cents": p.total_cents,
        "currency": p.currency,
        "amount_mismatch": transition.amount_mismatch,
    });
    match state.audit.get() {
        Ok(audit_conn) => {
            if let Err(e) = AuditLogBuilder::system(&audit_conn, state.audit_log_enabled)
                .action(action)
                .resource("purchase", &p.id)
                .details(&details)
                .save()
            {
                tracing::warn!("Failed to write purchase audit log: {}", e);
            }
        }
        Err(e) => tracing::warn!("Audit DB connection error: {}", e),
    }

    tracing::info!(
        purchase_id = %p.id,
        from = %transition.from.as_ref(),
        to = %transition.to.as_ref(),
        source,
        "Purchase status changed"
    );
}

/// Insert notifications for `user_ids` in one transaction.
pub fn notify_users(
    state: &AppState,
    user_ids: &[String],
    notification: &NewNotification,
) -> Result<usize> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;
    let created = queries::create_notifications(&tx, user_ids, notification)?;
    tx.commit()?;
    Ok(created.len())
}

/// Complete a zero-total purchase without a gateway.
pub fn complete_free_purchase(conn: &mut Connection, purchase_id: &str) -> Result<Transition> {
    match apply_outcome(
        conn,
        purchase_id,
        None,
        PaymentOutcome::Succeeded {
            amount_cents: Some(0),
            currency: None,
        },
        &GatewayRefs::default(),
    )? {
        ApplyResult::Applied(transition) => Ok(transition),
        other => Err(AppError::Internal(format!(
            "Free purchase {} could not be completed: {:?}",
            purchase_id, other
        ))),
    }
}

/// Age after which an unpaid purchase is abandoned.
pub const PENDING_PURCHASE_MAX_AGE_SECS: i64 = 48 * 3600;

/// Fail stale pending purchases and record each one.
pub fn expire_stale_purchases(state: &AppState) -> Result<usize> {
    let conn = state.db.get()?;
    let expired = queries::expire_stale_purchases(&conn, PENDING_PURCHASE_MAX_AGE_SECS)?;
    if expired.is_empty() {
        return Ok(0);
    }

    let audit_conn = state.audit.get()?;
    for id in &expired {
        if let Err(e) = AuditLogBuilder::system(&audit_conn, state.audit_log_enabled)
            .action(AuditAction::ExpirePurchase)
            .resource("purchase", id)
            .save()
        {
            tracing::warn!("Failed to write expiry audit log: {}", e);
        }
    }
    tracing::info!(count = expired.len(), "Expired stale pending purchases");
    Ok(expired.len())
}
