use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::db::AppState;
use crate::fulfillment::PaymentOutcome;
use crate::payments::{
    PaymentProvider, StripeCharge, StripeCheckoutSession, StripeClient, StripeWebhookEvent,
};

use super::common::{
    PaymentEvent, PurchaseRef, WebhookEvent, WebhookProvider, WebhookResult, handle_webhook,
};

/// Stripe webhook provider implementation.
pub struct StripeWebhookProvider<'a> {
    client: &'a StripeClient,
}

impl<'a> StripeWebhookProvider<'a> {
    pub fn new(client: &'a StripeClient) -> Self {
        Self { client }
    }
}

impl WebhookProvider for StripeWebhookProvider<'_> {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    fn verify_signature(&self, headers: &HeaderMap, body: &Bytes) -> Result<bool, WebhookResult> {
        let signature = headers
            .get("stripe-signature")
            .ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?
            .to_str()
            .map_err(|e| {
                tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid signature header")
            })?;

        self.client
            .verify_webhook_signature(body, signature)
            .map_err(|e| {
                tracing::warn!("Stripe signature header rejected: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid signature header")
            })
    }

    async fn parse_event(&self, body: &Bytes) -> Result<WebhookEvent, WebhookResult> {
        let event: StripeWebhookEvent = serde_json::from_slice(body).map_err(|e| {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid JSON")
        })?;

        match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                parse_session(&event, SessionOutcome::Paid)
            }
            "checkout.session.async_payment_failed" => {
                parse_session(&event, SessionOutcome::Failed("payment_failed"))
            }
            "checkout.session.expired" => parse_session(&event, SessionOutcome::Failed("expired")),
            "charge.refunded" => parse_charge_refunded(&event),
            _ => Ok(WebhookEvent::Ignored),
        }
    }
}

enum SessionOutcome {
    Paid,
    Failed(&'static str),
}

fn parse_session(
    event: &StripeWebhookEvent,
    outcome: SessionOutcome,
) -> Result<WebhookEvent, WebhookResult> {
    let session: StripeCheckoutSession = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::error!("Failed to parse checkout session: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid checkout session")
        })?;

    let outcome = match outcome {
        // "unpaid" means an async method (bank debit, boleto) is still running
        SessionOutcome::Paid if session.payment_status != "paid" => {
            tracing::info!(
                session_id = %session.id,
                payment_status = %session.payment_status,
                "Checkout completed without payment yet"
            );
            return Ok(WebhookEvent::Ignored);
        }
        SessionOutcome::Paid => PaymentOutcome::Succeeded {
            amount_cents: session.amount_total,
            currency: session.currency.clone(),
        },
        SessionOutcome::Failed(reason) => PaymentOutcome::Failed {
            reason: reason.to_string(),
        },
    };

    let mut refs = Vec::new();
    if let Some(id) = session.purchase_id() {
        refs.push(PurchaseRef::PurchaseId(id.to_string()));
    }
    refs.push(PurchaseRef::CheckoutId(session.id.clone()));

    Ok(WebhookEvent::Payment(PaymentEvent {
        event_id: event.id.clone(),
        refs,
        outcome,
        payment_id: session.payment_intent,
        merchant_order_id: None,
    }))
}

fn parse_charge_refunded(event: &StripeWebhookEvent) -> Result<WebhookEvent, WebhookResult> {
    let charge: StripeCharge = serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!("Failed to parse charge: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid charge")
    })?;

    // Access is only revoked on a full refund
    if !charge.is_fully_refunded() {
        tracing::info!(
            charge_id = %charge.id,
            amount = charge.amount,
            refunded = charge.amount_refunded,
            "Partial refund ignored"
        );
        return Ok(WebhookEvent::Ignored);
    }

    let mut refs = Vec::new();
    if let Some(id) = &charge.metadata.purchase_id {
        refs.push(PurchaseRef::PurchaseId(id.clone()));
    }
    if let Some(pi) = &charge.payment_intent {
        refs.push(PurchaseRef::PaymentId(pi.clone()));
    }

    Ok(WebhookEvent::Payment(PaymentEvent {
        event_id: event.id.clone(),
        refs,
        outcome: PaymentOutcome::Refunded,
        payment_id: charge.payment_intent,
        merchant_order_id: None,
    }))
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(client) = state.stripe.as_ref() else {
        return (StatusCode::OK, "Stripe not configured");
    };
    handle_webhook(&StripeWebhookProvider::new(client), &state, headers, body).await
}
