//! Cart totals and coupon discounts.
//!
//! Pure functions over already-loaded rows so checkout, cart quotes and
//! tests all agree on the numbers. Amounts are integer cents; percentage
//! discounts round down so a customer is never over-discounted by a cent.

use serde::Serialize;
use thiserror::Error;

use crate::error::{AppError, Result, msg};
use crate::models::{CartItem, Coupon, CouponKind};

/// Why a coupon cannot be applied to the current cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("Coupon is not active")]
    Inactive,
    #[error("Coupon has expired")]
    Expired,
    #[error("Coupon has reached its usage limit")]
    Exhausted,
    #[error("Coupon currency does not match the cart")]
    CurrencyMismatch,
    #[error("Coupon does not apply to any course in the cart")]
    CourseNotInCart,
}

impl From<CouponRejection> for AppError {
    fn from(r: CouponRejection) -> Self {
        AppError::BadRequest(r.to_string())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppliedCoupon {
    pub id: String,
    pub code: String,
    pub kind: CouponKind,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Quote {
    pub currency: String,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub coupon: Option<AppliedCoupon>,
}

/// The single currency every line in the cart shares.
pub fn cart_currency(items: &[CartItem]) -> Result<String> {
    let first = items
        .first()
        .ok_or_else(|| AppError::BadRequest(msg::CART_EMPTY.into()))?;
    if items.iter().any(|i| i.currency != first.currency) {
        return Err(AppError::BadRequest(msg::MIXED_CURRENCIES.into()));
    }
    Ok(first.currency.clone())
}

/// Checks that do not depend on the cart: active flag, expiry, usage limit.
pub fn check_coupon_usable(coupon: &Coupon, now: i64) -> std::result::Result<(), CouponRejection> {
    if !coupon.active {
        return Err(CouponRejection::Inactive);
    }
    if let Some(expires_at) = coupon.expires_at
        && now > expires_at
    {
        return Err(CouponRejection::Expired);
    }
    if let Some(max_uses) = coupon.max_uses
        && coupon.used_count >= max_uses
    {
        return Err(CouponRejection::Exhausted);
    }
    Ok(())
}

/// Discount in cents for `coupon` over `items`, never exceeding the discounted base.
pub fn compute_discount(
    coupon: &Coupon,
    items: &[CartItem],
    currency: &str,
) -> std::result::Result<i64, CouponRejection> {
    let base: i64 = match coupon.course_id {
        Some(ref course_id) => items
            .iter()
            .find(|i| &i.course_id == course_id)
            .map(|i| i.price_cents)
            .ok_or(CouponRejection::CourseNotInCart)?,
        None => items.iter().map(|i| i.price_cents).sum(),
    };

    let discount = match coupon.kind {
        CouponKind::Percentage => base * coupon.value.clamp(0, 100) / 100,
        CouponKind::Fixed => {
            if coupon.currency.as_deref() != Some(currency) {
                return Err(CouponRejection::CurrencyMismatch);
            }
            coupon.value.min(base)
        }
    };

    Ok(discount.max(0))
}

/// Price the cart, optionally applying a coupon.
pub fn quote(items: &[CartItem], coupon: Option<&Coupon>, now: i64) -> Result<Quote> {
    let currency = cart_currency(items)?;
    let subtotal_cents: i64 = items.iter().map(|i| i.price_cents).sum();

    let (discount_cents, applied) = match coupon {
        Some(c) => {
            check_coupon_usable(c, now)?;
            let discount = compute_discount(c, items, &currency)?;
            (
                discount,
                Some(AppliedCoupon {
                    id: c.id.clone(),
                    code: c.code.clone(),
                    kind: c.kind,
                    value: c.value,
                }),
            )
        }
        None => (0, None),
    };

    Ok(Quote {
        currency,
        subtotal_cents,
        discount_cents,
        total_cents: (subtotal_cents - discount_cents).max(0),
        coupon: applied,
    })
}
