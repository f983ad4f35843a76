use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};

use super::cart::lookup_coupon;
use crate::db::queries::{self, GatewayRefs};
use crate::db::AppState;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::fulfillment::{self, PaymentOutcome};
use crate::middleware::AuthContext;
use crate::models::{
    AuditAction, CheckoutRequest, CheckoutResponse, CreatePurchase, Purchase, PurchaseStatus,
    PurchaseWithItems,
};
use crate::pagination::{Paginated, PaginationQuery};
use crate::payments::{CheckoutLine, CheckoutSession, GatewayCheckout, PaymentProvider};
use crate::pricing;
use crate::util::AuditLogBuilder;

/// Pick the gateway for a paid checkout: the requested one, else the first
/// configured.
fn choose_provider(state: &AppState, requested: Option<PaymentProvider>) -> Result<PaymentProvider> {
    let configured = |p: PaymentProvider| match p {
        PaymentProvider::Stripe => state.stripe.is_some(),
        PaymentProvider::MercadoPago => state.mercadopago.is_some(),
        PaymentProvider::Free => false,
    };
    match requested {
        Some(p) if configured(p) => Ok(p),
        Some(_) => Err(AppError::BadRequest(msg::GATEWAY_NOT_CONFIGURED.into())),
        None => [PaymentProvider::Stripe, PaymentProvider::MercadoPago]
            .into_iter()
            .find(|p| configured(*p))
            .ok_or_else(|| AppError::BadRequest(msg::GATEWAY_NOT_CONFIGURED.into())),
    }
}

async fn create_gateway_checkout(
    state: &AppState,
    provider: PaymentProvider,
    checkout: &GatewayCheckout<'_>,
) -> Result<CheckoutSession> {
    match provider {
        PaymentProvider::Stripe => {
            let client = state
                .stripe
                .as_ref()
                .ok_or_else(|| AppError::BadRequest(msg::GATEWAY_NOT_CONFIGURED.into()))?;
            client.create_checkout_session(checkout).await
        }
        PaymentProvider::MercadoPago => {
            let client = state
                .mercadopago
                .as_ref()
                .ok_or_else(|| AppError::BadRequest(msg::GATEWAY_NOT_CONFIGURED.into()))?;
            client.create_preference(checkout).await
        }
        PaymentProvider::Free => Err(AppError::Internal(
            "free purchases have no gateway checkout".into(),
        )),
    }
}

/// Turn the cart into a pending purchase and hand it to a gateway.
///
/// A zero total is completed on the spot with provider `free`. If the
/// gateway call fails the purchase is marked failed so it does not linger
/// as pending.
pub async fn checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(input): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>)> {
    let user = &ctx.user;

    let purchase = {
        let mut conn = state.db.get()?;
        let items = queries::get_cart_items(&conn, &user.id)?;
        if items.is_empty() {
            return Err(AppError::BadRequest(msg::CART_EMPTY.into()));
        }
        for item in &items {
            if queries::has_active_enrollment(&conn, &user.id, &item.course_id)? {
                return Err(AppError::Conflict(format!(
                    "{}: {}",
                    msg::ALREADY_ENROLLED,
                    item.title
                )));
            }
        }

        let coupon = lookup_coupon(&conn, input.coupon_code.as_deref())?;
        let quote = pricing::quote(&items, coupon.as_ref(), chrono::Utc::now().timestamp())?;
        let provider = if quote.total_cents == 0 {
            PaymentProvider::Free
        } else {
            choose_provider(&state, input.provider)?
        };

        let tx = conn.transaction()?;
        let purchase = queries::create_purchase(
            &tx,
            &CreatePurchase {
                user_id: user.id.clone(),
                currency: quote.currency.clone(),
                subtotal_cents: quote.subtotal_cents,
                discount_cents: quote.discount_cents,
                total_cents: quote.total_cents,
                coupon_id: quote.coupon.as_ref().map(|c| c.id.clone()),
                coupon_code: quote.coupon.as_ref().map(|c| c.code.clone()),
                provider,
                items: items
                    .iter()
                    .map(|i| (i.course_id.clone(), i.title.clone(), i.price_cents))
                    .collect(),
            },
        )?;
        tx.commit()?;
        purchase
    };
    let p = &purchase.purchase;

    let (status, checkout_url) = if p.provider == PaymentProvider::Free {
        let mut conn = state.db.get()?;
        let transition = fulfillment::complete_free_purchase(&mut conn, &p.id)?;
        drop(conn);
        fulfillment::after_commit(&state, &transition, "checkout");
        (transition.to, None)
    } else {
        let gateway = GatewayCheckout {
            purchase_id: &p.id,
            customer_email: &user.email,
            currency: &p.currency,
            lines: purchase
                .items
                .iter()
                .map(|i| CheckoutLine {
                    title: i.title.clone(),
                    unit_amount_cents: i.price_cents,
                })
                .collect(),
            discount_cents: p.discount_cents,
            total_cents: p.total_cents,
            success_url: format!("{}/purchases/{}?result=success", state.base_url, p.id),
            cancel_url: format!("{}/purchases/{}?result=cancelled", state.base_url, p.id),
            notification_url: format!("{}/webhooks/{}", state.base_url, p.provider),
        };

        let session = match create_gateway_checkout(&state, p.provider, &gateway).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(purchase_id = %p.id, provider = %p.provider, "Gateway checkout failed: {}", e);
                let mut conn = state.db.get()?;
                fulfillment::apply_outcome(
                    &mut conn,
                    &p.id,
                    None,
                    PaymentOutcome::Failed {
                        reason: "checkout_failed".to_string(),
                    },
                    &GatewayRefs::default(),
                )?;
                return Err(e);
            }
        };

        let conn = state.db.get()?;
        queries::set_purchase_checkout_id(&conn, &p.id, &session.id)?;
        (PurchaseStatus::Pending, Some(session.url))
    };

    let audit_conn = state.audit.get()?;
    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .user(user)
        .action(AuditAction::Checkout)
        .resource("purchase", &p.id)
        .details(&serde_json::json!({
            "provider": p.provider.as_ref(),
            "total_cents": p.total_cents,
            "currency": p.currency,
            "coupon_code": p.coupon_code,
            "courses": purchase.items.iter().map(|i| &i.course_id).collect::<Vec<_>>(),
        }))
        .save()?;

    tracing::info!(purchase_id = %p.id, provider = %p.provider, total_cents = p.total_cents, "Checkout created");

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            purchase_id: p.id.clone(),
            status,
            total_cents: p.total_cents,
            currency: p.currency.clone(),
            checkout_url,
        }),
    ))
}

pub async fn list_my_purchases(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Paginated<Purchase>>> {
    let conn = state.db.get()?;
    let (purchases, total) = queries::list_purchases_paginated(
        &conn,
        Some(ctx.user_id()),
        None,
        query.limit(),
        query.offset(),
    )?;
    Ok(Json(Paginated::from_query(purchases, total, &query)))
}

pub async fn get_purchase(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<PurchaseWithItems>> {
    let conn = state.db.get()?;
    let purchase =
        queries::get_purchase_with_items(&conn, &id)?.or_not_found(msg::PURCHASE_NOT_FOUND)?;
    ctx.require_self_or_admin(&purchase.purchase.user_id, msg::PURCHASE_NOT_FOUND)?;
    Ok(Json(purchase))
}
