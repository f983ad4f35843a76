//! Shared webhook pipeline for the payment gateways.
//!
//! Each gateway implements [`WebhookProvider`] to authenticate the request and
//! turn the payload into a provider-agnostic [`WebhookEvent`]. Locating the
//! purchase and applying the outcome is common code.

use std::future::Future;

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
};
use rusqlite::Connection;

use crate::db::queries::{self, GatewayRefs};
use crate::db::AppState;
use crate::error::AppError;
use crate::fulfillment::{self, ApplyResult, EventKey, PaymentOutcome};
use crate::models::Purchase;
use crate::payments::PaymentProvider;

/// Status and short body returned to the gateway. Non-2xx makes it retry.
pub type WebhookResult = (StatusCode, &'static str);

/// Helper to unwrap DB query results with consistent error handling.
fn db_lookup<T>(
    result: Result<Option<T>, AppError>,
    not_found_msg: &'static str,
) -> Result<T, WebhookResult> {
    match result {
        Ok(Some(v)) => Ok(v),
        Ok(None) => Err((StatusCode::OK, not_found_msg)),
        Err(e) => {
            tracing::error!("DB error: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"))
        }
    }
}

/// A way to find the purchase a notification is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseRef {
    PurchaseId(String),
    CheckoutId(String),
    PaymentId(String),
    MerchantOrderId(String),
}

/// A payment notification reduced to what the purchase state machine needs.
#[derive(Debug)]
pub struct PaymentEvent {
    /// Unique per (provider, event) and used for replay protection
    pub event_id: String,
    /// Tried in order until one matches
    pub refs: Vec<PurchaseRef>,
    pub outcome: PaymentOutcome,
    pub payment_id: Option<String>,
    pub merchant_order_id: Option<String>,
}

#[derive(Debug)]
pub enum WebhookEvent {
    Payment(PaymentEvent),
    /// Event type or status that does not move a purchase
    Ignored,
}

/// Trait for payment provider webhook handling.
pub trait WebhookProvider: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Authenticate the request. `Ok(false)` is answered with 401.
    fn verify_signature(&self, headers: &HeaderMap, body: &Bytes) -> Result<bool, WebhookResult>;

    /// Parse the payload, fetching gateway state if the payload alone is not
    /// authoritative.
    fn parse_event(
        &self,
        body: &Bytes,
    ) -> impl Future<Output = Result<WebhookEvent, WebhookResult>> + Send;
}

fn find_purchase(
    conn: &Connection,
    provider: PaymentProvider,
    refs: &[PurchaseRef],
) -> Result<Option<Purchase>, AppError> {
    for r in refs {
        let found = match r {
            PurchaseRef::PurchaseId(id) => queries::get_purchase_by_id(conn, id)?,
            PurchaseRef::CheckoutId(id) => queries::find_purchase_by_checkout_id(conn, provider, id)?,
            PurchaseRef::PaymentId(id) => queries::find_purchase_by_payment_id(conn, provider, id)?,
            PurchaseRef::MerchantOrderId(id) => {
                queries::find_purchase_by_merchant_order_id(conn, provider, id)?
            }
        };
        if let Some(purchase) = found {
            if purchase.provider != provider {
                tracing::warn!(
                    purchase_id = %purchase.id,
                    expected = %purchase.provider,
                    got = %provider,
                    "Webhook references a purchase of another gateway"
                );
                return Ok(None);
            }
            return Ok(Some(purchase));
        }
    }
    Ok(None)
}

/// Generic webhook handler that works with any provider.
pub async fn handle_webhook<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    match provider.verify_signature(&headers, &body) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(provider = %provider.provider(), "Webhook signature rejected");
            return (StatusCode::UNAUTHORIZED, "Invalid signature");
        }
        Err(e) => return e,
    }

    let event = match provider.parse_event(&body).await {
        Ok(e) => e,
        Err(e) => return e,
    };

    match event {
        WebhookEvent::Payment(event) => handle_payment(provider.provider(), state, event)
            .await
            .unwrap_or_else(|e| e),
        WebhookEvent::Ignored => (StatusCode::OK, "Event ignored"),
    }
}

async fn handle_payment(
    provider: PaymentProvider,
    state: &AppState,
    event: PaymentEvent,
) -> Result<WebhookResult, WebhookResult> {
    let mut conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    let purchase = db_lookup(find_purchase(&conn, provider, &event.refs), "Purchase not found")
        .inspect_err(|(status, _)| {
            if *status == StatusCode::OK {
                tracing::warn!(provider = %provider, event_id = %event.event_id, refs = ?event.refs, "Webhook for unknown purchase");
            }
        })?;

    let refs = GatewayRefs {
        payment_id: event.payment_id.as_deref(),
        merchant_order_id: event.merchant_order_id.as_deref(),
        failure_reason: None,
    };
    let key = EventKey {
        provider: provider.as_ref(),
        event_id: &event.event_id,
    };

    match fulfillment::apply_outcome(&mut conn, &purchase.id, Some(key), event.outcome, &refs) {
        Ok(ApplyResult::Applied(transition)) => {
            drop(conn);
            fulfillment::after_commit(state, &transition, provider.as_ref());
            Ok((StatusCode::OK, "OK"))
        }
        Ok(ApplyResult::Duplicate) => {
            tracing::info!(provider = %provider, event_id = %event.event_id, "Duplicate webhook event");
            Ok((StatusCode::OK, "Already processed"))
        }
        Ok(ApplyResult::NotAllowed { current }) => {
            tracing::info!(
                provider = %provider,
                purchase_id = %purchase.id,
                status = %current.as_ref(),
                "Webhook does not change purchase status"
            );
            Ok((StatusCode::OK, "Ignored: status unchanged"))
        }
        Err(e) => {
            tracing::error!(purchase_id = %purchase.id, "Failed to apply webhook: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Database error"))
        }
    }
}
