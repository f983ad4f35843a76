use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::db::AppState;
use crate::fulfillment::PaymentOutcome;
use crate::payments::{
    MercadoPagoClient, MercadoPagoMerchantOrder, MercadoPagoNotification, MercadoPagoPayment,
    PaymentProvider,
};

use super::common::{
    PaymentEvent, PurchaseRef, WebhookEvent, WebhookProvider, WebhookResult, handle_webhook,
};

/// Query string Mercado Pago appends to the notification URL.
#[derive(Debug, Default, Deserialize)]
pub struct MercadoPagoQuery {
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Legacy IPN style: `?topic=merchant_order&id=123`
    pub topic: Option<String>,
    pub id: Option<String>,
}

/// Mercado Pago notifications only say "something changed". The payment is
/// always fetched from the API before acting.
pub struct MercadoPagoWebhookProvider<'a> {
    client: &'a MercadoPagoClient,
    query: MercadoPagoQuery,
}

impl<'a> MercadoPagoWebhookProvider<'a> {
    pub fn new(client: &'a MercadoPagoClient, query: MercadoPagoQuery) -> Self {
        Self { client, query }
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<MercadoPagoPayment, WebhookResult> {
        self.client.get_payment(payment_id).await.map_err(|e| {
            tracing::error!(payment_id, "Mercado Pago payment lookup failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Gateway lookup failed")
        })
    }

    async fn fetch_merchant_order(&self, order_id: &str) -> Result<MercadoPagoMerchantOrder, WebhookResult> {
        self.client.get_merchant_order(order_id).await.map_err(|e| {
            tracing::error!(order_id, "Mercado Pago order lookup failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Gateway lookup failed")
        })
    }
}

impl WebhookProvider for MercadoPagoWebhookProvider<'_> {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::MercadoPago
    }

    fn verify_signature(&self, headers: &HeaderMap, _body: &Bytes) -> Result<bool, WebhookResult> {
        if !self.client.has_webhook_secret() {
            return Ok(true);
        }

        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let Some(signature) = header("x-signature") else {
            return Ok(false);
        };

        self.client
            .verify_webhook_signature(signature, header("x-request-id"), self.query.data_id.as_deref())
            .map_err(|e| {
                tracing::warn!("Mercado Pago signature header rejected: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid signature header")
            })
    }

    async fn parse_event(&self, body: &Bytes) -> Result<WebhookEvent, WebhookResult> {
        // IPN notifications may come with an empty body
        let notification: Option<MercadoPagoNotification> = if body.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(body).map_err(|e| {
                tracing::error!("Failed to parse Mercado Pago webhook: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON")
            })?)
        };

        let kind = notification
            .as_ref()
            .and_then(|n| n.kind.clone())
            .or_else(|| self.query.kind.clone())
            .or_else(|| self.query.topic.clone());
        let resource_id = notification
            .as_ref()
            .and_then(|n| n.data.as_ref().map(|d| d.id.clone()))
            .or_else(|| self.query.data_id.clone())
            .or_else(|| self.query.id.clone());

        let (Some(kind), Some(resource_id)) = (kind, resource_id) else {
            return Ok(WebhookEvent::Ignored);
        };

        match kind.as_str() {
            "payment" => {
                let mut payment = self.fetch_payment(&resource_id).await?;
                // Payments created outside the preference flow carry the
                // reference only on their merchant order
                if payment.external_reference.is_none()
                    && let Some(order_id) = payment.merchant_order_id()
                {
                    let order = self.fetch_merchant_order(&order_id).await?;
                    payment.external_reference = order.external_reference;
                }
                Ok(payment_event(&payment))
            }
            "merchant_order" | "topic_merchant_order_wh" => {
                let order = self.fetch_merchant_order(&resource_id).await?;
                // Only an approved payment on the order is actionable here;
                // failures and refunds arrive as payment notifications
                let Some(approved) = order.payments.iter().find(|p| p.status == "approved") else {
                    return Ok(WebhookEvent::Ignored);
                };
                let mut payment = self.fetch_payment(&approved.id.to_string()).await?;
                if payment.external_reference.is_none() {
                    payment.external_reference = order.external_reference.clone();
                }
                Ok(payment_event(&payment))
            }
            _ => Ok(WebhookEvent::Ignored),
        }
    }
}

/// Map a fetched payment to a purchase outcome.
fn payment_event(payment: &MercadoPagoPayment) -> WebhookEvent {
    let outcome = match payment.status.as_str() {
        "approved" => PaymentOutcome::Succeeded {
            amount_cents: Some(payment.amount_cents()),
            currency: Some(payment.currency_id.clone()),
        },
        "rejected" | "cancelled" => PaymentOutcome::Failed {
            reason: payment
                .status_detail
                .clone()
                .unwrap_or_else(|| payment.status.clone()),
        },
        "refunded" | "charged_back" => PaymentOutcome::Refunded,
        // pending, in_process, authorized
        _ => return WebhookEvent::Ignored,
    };

    let payment_id = payment.id.to_string();
    let merchant_order_id = payment.merchant_order_id();

    let mut refs = Vec::new();
    if let Some(reference) = &payment.external_reference {
        refs.push(PurchaseRef::PurchaseId(reference.clone()));
    }
    refs.push(PurchaseRef::PaymentId(payment_id.clone()));
    if let Some(order_id) = &merchant_order_id {
        refs.push(PurchaseRef::MerchantOrderId(order_id.clone()));
    }

    WebhookEvent::Payment(PaymentEvent {
        // Mercado Pago reuses one payment id across status changes
        event_id: format!("{}:{}", payment_id, payment.status),
        refs,
        outcome,
        payment_id: Some(payment_id),
        merchant_order_id,
    })
}

pub async fn handle_mercadopago_webhook(
    State(state): State<AppState>,
    Query(query): Query<MercadoPagoQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(client) = state.mercadopago.as_ref() else {
        return (StatusCode::OK, "Mercado Pago not configured");
    };
    handle_webhook(
        &MercadoPagoWebhookProvider::new(client, query),
        &state,
        headers,
        body,
    )
    .await
}
