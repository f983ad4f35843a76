use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::course::{deserialize_optional_nullable, validate_currency};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CouponKind {
    /// `value` is a whole percentage (1-100)
    Percentage,
    /// `value` is an amount in cents of `currency`
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: String,
    pub code: String,
    pub kind: CouponKind,
    pub value: i64,
    pub currency: Option<String>,
    pub max_uses: Option<i64>,
    pub used_count: i64,
    pub expires_at: Option<i64>,
    /// Restricts the discount to a single course line
    pub course_id: Option<String>,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Codes are matched case-insensitively and stored uppercase.
pub fn normalize_coupon_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Deserialize)]
pub struct CreateCoupon {
    pub code: String,
    pub kind: CouponKind,
    pub value: i64,
    pub currency: Option<String>,
    pub max_uses: Option<i64>,
    pub expires_at: Option<i64>,
    pub course_id: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

fn validate_code(code: &str) -> Result<()> {
    let code = code.trim();
    if code.len() < 3 || code.len() > 40 {
        return Err(AppError::BadRequest(
            "Coupon code must be 3 to 40 characters".into(),
        ));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::BadRequest(
            "Coupon code may only contain letters, digits, '-' and '_'".into(),
        ));
    }
    Ok(())
}

impl CreateCoupon {
    pub fn validate(&self) -> Result<()> {
        validate_code(&self.code)?;
        match self.kind {
            CouponKind::Percentage => {
                if !(1..=100).contains(&self.value) {
                    return Err(AppError::BadRequest(
                        "Percentage coupons need a value between 1 and 100".into(),
                    ));
                }
            }
            CouponKind::Fixed => {
                if self.value <= 0 {
                    return Err(AppError::BadRequest(
                        "Fixed coupons need a positive amount".into(),
                    ));
                }
                let Some(ref currency) = self.currency else {
                    return Err(AppError::BadRequest(
                        "Fixed coupons require a currency".into(),
                    ));
                };
                validate_currency(currency)?;
            }
        }
        if let Some(max) = self.max_uses
            && max <= 0
        {
            return Err(AppError::BadRequest("max_uses must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCoupon {
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub max_uses: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub expires_at: Option<Option<i64>>,
}

impl UpdateCoupon {
    pub fn validate(&self) -> Result<()> {
        if let Some(Some(max)) = self.max_uses
            && max <= 0
        {
            return Err(AppError::BadRequest("max_uses must be positive".into()));
        }
        Ok(())
    }
}
