use serde::{Deserialize, Serialize};

use crate::payments::PaymentProvider;

/// A money movement tied to a purchase. Refunds carry negative amounts and
/// point at the purchase transaction they reverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub purchase_id: String,
    pub user_id: String,

    pub provider: PaymentProvider,
    pub provider_payment_id: Option<String>,

    // Amounts (cents)
    pub currency: String,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,

    pub coupon_code: Option<String>,

    pub transaction_type: TransactionType,
    pub parent_transaction_id: Option<String>,
    pub created_at: i64,
}

/// Data required to create a new transaction
#[derive(Debug, Clone)]
pub struct CreateTransaction {
    pub purchase_id: String,
    pub user_id: String,
    pub provider: PaymentProvider,
    pub provider_payment_id: Option<String>,
    pub currency: String,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub coupon_code: Option<String>,
    pub transaction_type: TransactionType,
    pub parent_transaction_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(Self::Purchase),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
