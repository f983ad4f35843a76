mod mercadopago;
mod stripe;

pub use mercadopago::*;
pub use stripe::*;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    MercadoPago,
    /// Zero-total purchases completed without a gateway
    Free,
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A hosted checkout page created at the gateway.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Stripe session id / Mercado Pago preference id
    pub id: String,
    pub url: String,
}

/// One purchase line as sent to a gateway.
#[derive(Debug, Clone)]
pub struct CheckoutLine {
    pub title: String,
    pub unit_amount_cents: i64,
}

/// Everything a gateway needs to create a checkout for a pending purchase.
#[derive(Debug, Clone)]
pub struct GatewayCheckout<'a> {
    pub purchase_id: &'a str,
    pub customer_email: &'a str,
    pub currency: &'a str,
    pub lines: Vec<CheckoutLine>,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub success_url: String,
    pub cancel_url: String,
    pub notification_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names() {
        assert_eq!(PaymentProvider::MercadoPago.as_ref(), "mercadopago");
        assert_eq!("stripe".parse::<PaymentProvider>().unwrap(), PaymentProvider::Stripe);
        assert_eq!(
            serde_json::to_string(&PaymentProvider::MercadoPago).unwrap(),
            "\"mercadopago\""
        );
    }
}
