//! Mercado Pago notifications against a mock payments API

#[path = "../common/mod.rs"]
mod common;

use axum::body::Body;
use axum::extract::Path;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::*;
use coursehub::payments::signature_for;
use serde_json::{Value, json};

const WEBHOOK_SECRET: &str = "mp-webhook-secret";
const PAYMENT_ID: u64 = 9001;
const ORDER_ID: u64 = 555;

/// Payments API that answers every lookup with one payment in `status`.
fn payments_api(purchase_id: &str, status: &'static str, amount: f64) -> Router {
    let payment = json!({
        "id": PAYMENT_ID,
        "status": status,
        "status_detail": if status == "approved" { "accredited" } else { "cc_rejected_other_reason" },
        "external_reference": purchase_id,
        "transaction_amount": amount,
        "currency_id": "USD",
        "order": {"id": ORDER_ID}
    });
    let order = json!({
        "id": ORDER_ID,
        "external_reference": purchase_id,
        "payments": [{"id": PAYMENT_ID, "status": status}]
    });
    mock_api(payment, order)
}

/// An approved payment whose purchase id is only on its merchant order.
fn order_referenced_api(purchase_id: &str) -> Router {
    let payment = json!({
        "id": PAYMENT_ID,
        "status": "approved",
        "status_detail": "accredited",
        "external_reference": null,
        "transaction_amount": 50.0,
        "currency_id": "USD",
        "order": {"id": ORDER_ID}
    });
    let order = json!({
        "id": ORDER_ID,
        "external_reference": purchase_id,
        "payments": [{"id": PAYMENT_ID, "status": "approved"}]
    });
    mock_api(payment, order)
}

fn mock_api(payment: Value, order: Value) -> Router {
    Router::new()
        .route(
            "/v1/payments/{id}",
            get(move |Path(id): Path<u64>| {
                let payment = payment.clone();
                async move {
                    if id == PAYMENT_ID {
                        Ok(Json(payment))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }
            }),
        )
        .route(
            "/merchant_orders/{id}",
            get(move |Path(id): Path<u64>| {
                let order = order.clone();
                async move {
                    if id == ORDER_ID {
                        Ok(Json(order))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }
            }),
        )
}

struct Store {
    app: TestApp,
    student: User,
    course: Course,
    purchase: Purchase,
}

impl Store {
    fn enrolled(&self) -> bool {
        queries::has_active_enrollment(&self.app.conn(), &self.student.id, &self.course.id).unwrap()
    }

    fn status(&self) -> PurchaseStatus {
        purchase_status(&self.app.conn(), &self.purchase.id)
    }
}

/// A pending Mercado Pago purchase; `api` is built once its id is known.
async fn store(
    secret: Option<&str>,
    api: impl FnOnce(&str) -> Router,
) -> Store {
    // The mock answers with the purchase id, so the client is attached last
    let seed = TestApp::new();
    let conn = seed.conn();
    let instructor = create_test_user(&conn, "instructor@example.com", UserRole::Instructor);
    let student = create_test_user(&conn, "student@example.com", UserRole::Student);
    let (course, _) = create_test_course(&conn, &instructor.id, "rust-basics", 5000, 1, true);
    drop(conn);
    let purchase = create_pending_purchase(
        &mut seed.conn(),
        &student.id,
        &[&course],
        PaymentProvider::MercadoPago,
    );

    let base = spawn_mock_server(api(&purchase.id)).await;
    let mut app = seed;
    app.state.mercadopago = Some(
        MercadoPagoClient::new(&mercadopago_settings(&base, secret)).with_retry_delays(vec![]),
    );
    Store {
        app,
        student,
        course,
        purchase,
    }
}

fn notification(data_id: &str) -> Value {
    json!({"type": "payment", "action": "payment.updated", "data": {"id": data_id}})
}

fn webhook_request(query: &str, body: &Value, signature: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/webhooks/mercadopago?{}", query))
        .header("content-type", "application/json");
    if let Some((request_id, header)) = signature {
        builder = builder
            .header("x-request-id", request_id)
            .header("x-signature", header);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn payment_query() -> String {
    format!("data.id={}&type=payment", PAYMENT_ID)
}

#[tokio::test]
async fn approved_payment_fulfills_purchase() {
    let store = store(None, |id| payments_api(id, "approved", 50.0)).await;

    let (status, body) = store
        .app
        .send(webhook_request(&payment_query(), &notification(&PAYMENT_ID.to_string()), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    assert_eq!(store.status(), PurchaseStatus::Paid);
    assert!(store.enrolled());

    let purchase = queries::get_purchase_by_id(&store.app.conn(), &store.purchase.id)
        .unwrap()
        .unwrap();
    assert_eq!(purchase.provider_payment_id.as_deref(), Some("9001"));
    assert_eq!(purchase.provider_merchant_order_id.as_deref(), Some("555"));

    // Mercado Pago repeats notifications for the same payment state
    let (_, body) = store
        .app
        .send(webhook_request(&payment_query(), &notification(&PAYMENT_ID.to_string()), None))
        .await;
    assert_eq!(body, "Already processed");
}

#[tokio::test]
async fn rejected_payment_fails_purchase() {
    let store = store(None, |id| payments_api(id, "rejected", 50.0)).await;

    store
        .app
        .send(webhook_request(&payment_query(), &notification(&PAYMENT_ID.to_string()), None))
        .await;
    assert_eq!(store.status(), PurchaseStatus::Failed);
    assert!(!store.enrolled());

    let purchase = queries::get_purchase_by_id(&store.app.conn(), &store.purchase.id)
        .unwrap()
        .unwrap();
    assert_eq!(purchase.failure_reason.as_deref(), Some("cc_rejected_other_reason"));
}

#[tokio::test]
async fn underpaid_approval_is_rejected() {
    let store = store(None, |id| payments_api(id, "approved", 10.0)).await;

    store
        .app
        .send(webhook_request(&payment_query(), &notification(&PAYMENT_ID.to_string()), None))
        .await;
    assert_eq!(store.status(), PurchaseStatus::Failed);
    assert!(!store.enrolled());
}

#[tokio::test]
async fn pending_payment_is_ignored() {
    let store = store(None, |id| payments_api(id, "in_process", 50.0)).await;

    let (status, body) = store
        .app
        .send(webhook_request(&payment_query(), &notification(&PAYMENT_ID.to_string()), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Event ignored");
    assert_eq!(store.status(), PurchaseStatus::Pending);
}

#[tokio::test]
async fn failed_lookup_asks_for_retry() {
    let store = store(None, |id| payments_api(id, "approved", 50.0)).await;

    let (status, _) = store
        .app
        .send(webhook_request("data.id=42&type=payment", &notification("42"), None))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(store.status(), PurchaseStatus::Pending);
}

#[tokio::test]
async fn merchant_order_notification_uses_approved_payment() {
    let store = store(None, |id| payments_api(id, "approved", 50.0)).await;

    // Legacy IPN format with an empty body
    let request = Request::builder()
        .method("POST")
        .uri(format!("/webhooks/mercadopago?topic=merchant_order&id={}", ORDER_ID))
        .body(Body::empty())
        .unwrap();
    let (status, body) = store.app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    assert_eq!(store.status(), PurchaseStatus::Paid);
}

#[tokio::test]
async fn payment_without_reference_resolves_through_merchant_order() {
    let store = store(None, order_referenced_api).await;

    let (status, body) = store
        .app
        .send(webhook_request(&payment_query(), &notification(&PAYMENT_ID.to_string()), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    assert_eq!(store.status(), PurchaseStatus::Paid);
    assert!(store.enrolled());
}

#[tokio::test]
async fn signed_notifications_are_verified() {
    let store = store(Some(WEBHOOK_SECRET), |id| payments_api(id, "approved", 50.0)).await;
    let data_id = PAYMENT_ID.to_string();
    let body = notification(&data_id);
    let ts = chrono::Utc::now().timestamp_millis().to_string();

    // Unsigned
    let (status, _) = store
        .app
        .send(webhook_request(&payment_query(), &body, None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signed with another secret
    let forged = signature_for("other-secret", &ts, Some("req-1"), Some(&data_id)).unwrap();
    let header = format!("ts={},v1={}", ts, forged);
    let (status, _) = store
        .app
        .send(webhook_request(&payment_query(), &body, Some(("req-1", &header))))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(store.status(), PurchaseStatus::Pending);

    let valid = signature_for(WEBHOOK_SECRET, &ts, Some("req-1"), Some(&data_id)).unwrap();
    let header = format!("ts={},v1={}", ts, valid);
    let (status, _) = store
        .app
        .send(webhook_request(&payment_query(), &body, Some(("req-1", &header))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.status(), PurchaseStatus::Paid);
}

#[tokio::test]
async fn checkout_creates_preference() {
    let mock = Router::new().route(
        "/checkout/preferences",
        post(|Json(request): Json<Value>| async move {
            assert_eq!(request["items"][0]["currency_id"], "USD");
            Json(json!({
                "id": "pref_123",
                "init_point": "https://mp.test/checkout?pref_id=pref_123"
            }))
        }),
    );
    let base = spawn_mock_server(mock).await;
    let app = TestApp::with_gateways(None, Some(mercadopago_settings(&base, None)));
    let conn = app.conn();
    let instructor = create_test_user(&conn, "instructor@example.com", UserRole::Instructor);
    let student = create_test_user(&conn, "student@example.com", UserRole::Student);
    let (course, _) = create_test_course(&conn, &instructor.id, "rust-basics", 5000, 1, true);
    drop(conn);
    let token = token_for(&app.state, &student);

    app.send(json_request(
        "POST",
        "/cart/items",
        Some(&token),
        &json!({"course_id": course.id}),
    ))
    .await;
    let (status, body) = app
        .send(json_request(
            "POST",
            "/checkout",
            Some(&token),
            &json!({"provider": "mercadopago"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["checkout_url"], "https://mp.test/checkout?pref_id=pref_123");

    let purchase = queries::find_purchase_by_checkout_id(
        &app.conn(),
        PaymentProvider::MercadoPago,
        "pref_123",
    )
    .unwrap()
    .expect("preference id should be stored");
    assert_eq!(purchase.status, PurchaseStatus::Pending);
}
