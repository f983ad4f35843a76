use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{CheckoutSession, GatewayCheckout};
use crate::config::StripeSettings;
use crate::error::{AppError, Result, msg};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(settings: &StripeSettings) -> Self {
        Self {
            client: Client::new(),
            secret_key: settings.secret_key.clone(),
            webhook_secret: settings.webhook_secret.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Build the form body for a checkout session.
    ///
    /// Prices are sent inline (`price_data`) from the purchase snapshot. Stripe
    /// rejects negative line items, so a discounted purchase is sent as a
    /// single line carrying the discounted total.
    fn checkout_form(checkout: &GatewayCheckout<'_>) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), checkout.success_url.clone()),
            ("cancel_url".into(), checkout.cancel_url.clone()),
            ("customer_email".into(), checkout.customer_email.to_string()),
            ("client_reference_id".into(), checkout.purchase_id.to_string()),
            ("metadata[purchase_id]".into(), checkout.purchase_id.to_string()),
            (
                "payment_intent_data[metadata][purchase_id]".into(),
                checkout.purchase_id.to_string(),
            ),
        ];

        let lines: Vec<(String, i64)> = if checkout.discount_cents > 0 {
            let titles: Vec<&str> = checkout.lines.iter().map(|l| l.title.as_str()).collect();
            vec![(titles.join(", "), checkout.total_cents)]
        } else {
            checkout
                .lines
                .iter()
                .map(|l| (l.title.clone(), l.unit_amount_cents))
                .collect()
        };

        for (i, (title, amount)) in lines.into_iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((format!("{}[quantity]", prefix), "1".into()));
            form.push((
                format!("{}[price_data][currency]", prefix),
                checkout.currency.to_string(),
            ));
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                amount.to_string(),
            ));
            form.push((format!("{}[price_data][product_data][name]", prefix), title));
        }
        form
    }

    /// Create a Stripe Checkout session for a pending purchase.
    pub async fn create_checkout_session(
        &self,
        checkout: &GatewayCheckout<'_>,
    ) -> Result<CheckoutSession> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .header("Idempotency-Key", checkout.purchase_id)
            .form(&Self::checkout_form(checkout))
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!("Stripe API error: {}", error_text)));
        }

        let session: CreateCheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse Stripe response: {}", e)))?;

        Ok(CheckoutSession {
            id: session.id,
            url: session.url,
        })
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Accepted clock skew for timestamps from the future.
    const WEBHOOK_FUTURE_SKEW_SECS: i64 = 60;

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        // Stripe signature format: t=timestamp,v1=signature[,v1=...]
        let mut timestamp = None;
        let mut candidates = Vec::new();

        for part in signature.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                candidates.push(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        if candidates.is_empty() {
            return Err(AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()));
        }

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        if age < -Self::WEBHOOK_FUTURE_SKEW_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp in the future (age={}s)",
                age
            );
            return Ok(false);
        }

        // Signed payload is "{t}.{raw body}"
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());
        let expected_bytes = expected.as_bytes();

        // Signature length is not secret (always 64 hex chars for SHA-256)
        Ok(candidates.iter().any(|sig| {
            let provided = sig.as_bytes();
            provided.len() == expected_bytes.len() && bool::from(expected_bytes.ct_eq(provided))
        }))
    }
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.* ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    /// "paid", "unpaid" or "no_payment_required"
    pub payment_status: String,
    pub payment_intent: Option<String>,
    pub client_reference_id: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

impl StripeCheckoutSession {
    pub fn purchase_id(&self) -> Option<&str> {
        self.metadata
            .purchase_id
            .as_deref()
            .or(self.client_reference_id.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeMetadata {
    pub purchase_id: Option<String>,
}

// ============ charge.refunded ============

#[derive(Debug, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    pub payment_intent: Option<String>,
    pub amount: i64,
    pub amount_refunded: i64,
    #[serde(default)]
    pub refunded: bool,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

impl StripeCharge {
    pub fn is_fully_refunded(&self) -> bool {
        self.refunded || (self.amount > 0 && self.amount_refunded >= self.amount)
    }
}
