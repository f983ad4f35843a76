use serde::{Deserialize, Serialize};

use crate::pricing::Quote;

#[derive(Debug, Clone, Serialize)]
pub struct CartItem {
    pub course_id: String,
    pub slug: String,
    pub title: String,
    pub price_cents: i64,
    pub currency: String,
    pub added_at: i64,
}

/// Per-currency subtotal; a cart normally has exactly one.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CurrencyAmount {
    pub currency: String,
    pub amount_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub subtotals: Vec<CurrencyAmount>,
}

impl Cart {
    pub fn new(items: Vec<CartItem>) -> Self {
        let mut subtotals: Vec<CurrencyAmount> = Vec::new();
        for item in &items {
            match subtotals.iter_mut().find(|s| s.currency == item.currency) {
                Some(s) => s.amount_cents += item.price_cents,
                None => subtotals.push(CurrencyAmount {
                    currency: item.currency.clone(),
                    amount_cents: item.price_cents,
                }),
            }
        }
        Self { items, subtotals }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddCartItem {
    pub course_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteRequest {
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    #[serde(flatten)]
    pub quote: Quote,
    pub items: Vec<CartItem>,
}
