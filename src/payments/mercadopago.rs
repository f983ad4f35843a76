use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{CheckoutSession, GatewayCheckout};
use crate::config::MercadoPagoSettings;
use crate::error::{AppError, Result, msg};

type HmacSha256 = Hmac<Sha256>;

/// Delays between payment lookups. Notifications can arrive before the
/// payment is readable through the API, which answers 404 until then.
const LOOKUP_RETRY_DELAYS_MS: &[u64] = &[500, 1500];

#[derive(Debug, Serialize)]
struct PreferenceItem<'a> {
    title: &'a str,
    quantity: u32,
    unit_price: f64,
    currency_id: String,
}

#[derive(Debug, Serialize)]
struct BackUrls<'a> {
    success: &'a str,
    failure: &'a str,
    pending: &'a str,
}

#[derive(Debug, Serialize)]
struct Payer<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct CreatePreferenceRequest<'a> {
    items: Vec<PreferenceItem<'a>>,
    external_reference: &'a str,
    notification_url: &'a str,
    back_urls: BackUrls<'a>,
    auto_return: &'static str,
    payer: Payer<'a>,
}

#[derive(Debug, Deserialize)]
struct CreatePreferenceResponse {
    id: String,
    init_point: String,
}

/// `GET /v1/payments/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct MercadoPagoPayment {
    pub id: u64,
    /// approved, pending, in_process, authorized, rejected, cancelled, refunded, charged_back
    pub status: String,
    pub status_detail: Option<String>,
    pub external_reference: Option<String>,
    pub transaction_amount: f64,
    pub currency_id: String,
    pub order: Option<MercadoPagoOrderRef>,
}

impl MercadoPagoPayment {
    /// Amount in integer minor units.
    pub fn amount_cents(&self) -> i64 {
        decimal_to_cents(self.transaction_amount)
    }

    pub fn merchant_order_id(&self) -> Option<String> {
        self.order.as_ref().map(|o| o.id.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MercadoPagoOrderRef {
    pub id: u64,
}

/// `GET /merchant_orders/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct MercadoPagoMerchantOrder {
    pub id: u64,
    pub external_reference: Option<String>,
    #[serde(default)]
    pub payments: Vec<MercadoPagoOrderPayment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MercadoPagoOrderPayment {
    pub id: u64,
    pub status: String,
}

/// Webhook notification body (`type=payment` / `topic=merchant_order`).
#[derive(Debug, Deserialize)]
pub struct MercadoPagoNotification {
    #[serde(rename = "type", alias = "topic")]
    pub kind: Option<String>,
    pub action: Option<String>,
    pub data: Option<MercadoPagoNotificationData>,
}

#[derive(Debug, Deserialize)]
pub struct MercadoPagoNotificationData {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

pub fn decimal_to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn cents_to_decimal(cents: i64) -> f64 {
    cents as f64 / 100.0
}

#[derive(Debug, Clone)]
pub struct MercadoPagoClient {
    client: Client,
    access_token: String,
    webhook_secret: Option<String>,
    api_base: String,
    retry_delays_ms: Vec<u64>,
}

impl MercadoPagoClient {
    pub fn new(settings: &MercadoPagoSettings) -> Self {
        Self {
            client: Client::new(),
            access_token: settings.access_token.clone(),
            webhook_secret: settings.webhook_secret.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            retry_delays_ms: LOOKUP_RETRY_DELAYS_MS.to_vec(),
        }
    }

    pub fn with_retry_delays(mut self, delays_ms: Vec<u64>) -> Self {
        self.retry_delays_ms = delays_ms;
        self
    }

    /// Create a Checkout Pro preference whose `external_reference` is the purchase id.
    pub async fn create_preference(&self, checkout: &GatewayCheckout<'_>) -> Result<CheckoutSession> {
        let currency_id = checkout.currency.to_uppercase();
        // Same single-line rule as Stripe: the gateway has no negative items.
        let joined;
        let items = if checkout.discount_cents > 0 {
            joined = checkout
                .lines
                .iter()
                .map(|l| l.title.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            vec![PreferenceItem {
                title: &joined,
                quantity: 1,
                unit_price: cents_to_decimal(checkout.total_cents),
                currency_id: currency_id.clone(),
            }]
        } else {
            checkout
                .lines
                .iter()
                .map(|l| PreferenceItem {
                    title: &l.title,
                    quantity: 1,
                    unit_price: cents_to_decimal(l.unit_amount_cents),
                    currency_id: currency_id.clone(),
                })
                .collect()
        };

        let request = CreatePreferenceRequest {
            items,
            external_reference: checkout.purchase_id,
            notification_url: &checkout.notification_url,
            back_urls: BackUrls {
                success: &checkout.success_url,
                failure: &checkout.cancel_url,
                pending: &checkout.success_url,
            },
            auto_return: "approved",
            payer: Payer {
                email: checkout.customer_email,
            },
        };

        let response = self
            .client
            .post(format!("{}/checkout/preferences", self.api_base))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", checkout.purchase_id)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Mercado Pago API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Mercado Pago API error: {}",
                error_text
            )));
        }

        let preference: CreatePreferenceResponse = response.json().await.map_err(|e| {
            AppError::Gateway(format!("Failed to parse Mercado Pago response: {}", e))
        })?;

        Ok(CheckoutSession {
            id: preference.id,
            url: preference.init_point,
        })
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<MercadoPagoPayment> {
        self.get_with_retry(&format!("{}/v1/payments/{}", self.api_base, payment_id))
            .await
    }

    pub async fn get_merchant_order(&self, order_id: &str) -> Result<MercadoPagoMerchantOrder> {
        self.get_with_retry(&format!("{}/merchant_orders/{}", self.api_base, order_id))
            .await
    }

    /// GET with fixed-delay retries on 404, 5xx, 429 and network errors.
    async fn get_with_retry<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut last_error = None;

        for (attempt, delay_ms) in std::iter::once(&0u64)
            .chain(self.retry_delays_ms.iter())
            .enumerate()
        {
            if attempt > 0 {
                tracing::debug!(attempt, delay_ms, url, "Retrying Mercado Pago lookup");
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            }

            match self.get_once(url).await {
                Ok(value) => return Ok(value),
                Err((error, true)) => last_error = Some(error),
                Err((error, false)) => return Err(error),
            }
        }

        tracing::warn!(
            url,
            attempts = self.retry_delays_ms.len() + 1,
            "Mercado Pago lookup failed after all retries"
        );
        Err(last_error
            .unwrap_or_else(|| AppError::Gateway("Mercado Pago lookup failed".into())))
    }

    /// Returns Err((error, is_transient)) on failure.
    async fn get_once<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, (AppError, bool)> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| (AppError::Gateway(format!("Mercado Pago API error: {}", e)), true))?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| {
                (
                    AppError::Gateway(format!("Failed to parse Mercado Pago response: {}", e)),
                    false,
                )
            });
        }

        let body = response.text().await.unwrap_or_default();
        let is_transient = status == StatusCode::NOT_FOUND
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error();
        Err((
            AppError::Gateway(format!("Mercado Pago API error: {} - {}", status, body)),
            is_transient,
        ))
    }

    pub fn has_webhook_secret(&self) -> bool {
        self.webhook_secret.is_some()
    }

    /// Verify `x-signature: ts=…,v1=…` against the manifest
    /// `id:{data.id};request-id:{x-request-id};ts:{ts};`.
    /// Parts whose value is absent are left out of the manifest.
    /// Returns true when no webhook secret is configured.
    pub fn verify_webhook_signature(
        &self,
        signature: &str,
        request_id: Option<&str>,
        data_id: Option<&str>,
    ) -> Result<bool> {
        let Some(secret) = self.webhook_secret.as_deref() else {
            return Ok(true);
        };

        let mut ts = None;
        let mut v1 = None;
        for part in signature.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key.trim() {
                "ts" => ts = Some(value.trim()),
                "v1" => v1 = Some(value.trim()),
                _ => {}
            }
        }
        let ts = ts.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let v1 = v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        let expected = signature_for(secret, ts, request_id, data_id)?;
        let provided = v1.as_bytes();
        Ok(provided.len() == expected.len() && bool::from(expected.as_bytes().ct_eq(provided)))
    }
}

/// Hex HMAC-SHA256 of the notification manifest.
pub fn signature_for(
    secret: &str,
    ts: &str,
    request_id: Option<&str>,
    data_id: Option<&str>,
) -> Result<String> {
    let mut manifest = String::new();
    if let Some(id) = data_id {
        // Alphanumeric ids are signed in lowercase
        manifest.push_str(&format!("id:{};", id.to_lowercase()));
    }
    if let Some(request_id) = request_id {
        manifest.push_str(&format!("request-id:{};", request_id));
    }
    manifest.push_str(&format!("ts:{};", ts));

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(manifest.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
