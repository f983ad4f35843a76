use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::payments::PaymentProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PurchaseStatus {
    /// Whether a gateway notification may move a purchase from `self` to `next`.
    ///
    /// Notifications arrive late, twice, or out of order. Anything not listed
    /// here is acknowledged and ignored:
    /// - a failure never overrides a payment (`Paid -> Failed`)
    /// - `Refunded` is terminal
    /// - a retried payment may still succeed after a failure (`Failed -> Paid`)
    /// - a refund for a purchase that never completed is recorded (`Pending|Failed -> Refunded`)
    pub fn can_transition_to(self, next: PurchaseStatus) -> bool {
        use PurchaseStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Failed)
                | (Failed, Paid)
                | (Paid, Refunded)
                | (Pending, Refunded)
                | (Failed, Refunded)
        )
    }

    /// States a purchase may be in when moving into `next`; used for the
    /// compare-and-swap UPDATE.
    pub fn allowed_sources(next: PurchaseStatus) -> Vec<PurchaseStatus> {
        [
            PurchaseStatus::Pending,
            PurchaseStatus::Paid,
            PurchaseStatus::Failed,
            PurchaseStatus::Refunded,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub user_id: String,
    pub status: PurchaseStatus,
    pub currency: String,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub coupon_id: Option<String>,
    pub coupon_code: Option<String>,
    pub provider: PaymentProvider,
    pub provider_checkout_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub provider_merchant_order_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub paid_at: Option<i64>,
    pub refunded_at: Option<i64>,
}

/// Course line snapshotted at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub id: String,
    pub purchase_id: String,
    pub course_id: String,
    pub title: String,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseWithItems {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub items: Vec<PurchaseItem>,
}

/// Data required to insert a pending purchase.
#[derive(Debug, Clone)]
pub struct CreatePurchase {
    pub user_id: String,
    pub currency: String,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub coupon_id: Option<String>,
    pub coupon_code: Option<String>,
    pub provider: PaymentProvider,
    /// (course_id, title, price_cents)
    pub items: Vec<(String, String, i64)>,
}

/// `POST /checkout`
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    pub coupon_code: Option<String>,
    /// Falls back to the first configured gateway
    pub provider: Option<PaymentProvider>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub purchase_id: String,
    pub status: PurchaseStatus,
    pub total_cents: i64,
    pub currency: String,
    /// Gateway-hosted payment page; absent for free purchases
    pub checkout_url: Option<String>,
}
