//! Stripe webhook handling: signatures, fulfillment and the purchase state machine

#[path = "../common/mod.rs"]
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::{Value, json};

struct Checkout {
    app: TestApp,
    student: User,
    course: Course,
    purchase: Purchase,
}

fn checkout() -> Checkout {
    let app = TestApp::with_gateways(Some(stripe_settings("http://127.0.0.1:9")), None);
    let conn = app.conn();
    let instructor = create_test_user(&conn, "instructor@example.com", UserRole::Instructor);
    let student = create_test_user(&conn, "student@example.com", UserRole::Student);
    let (course, _) = create_test_course(&conn, &instructor.id, "rust-basics", 5000, 1, true);
    drop(conn);
    let purchase = create_pending_purchase(
        &mut app.conn(),
        &student.id,
        &[&course],
        PaymentProvider::Stripe,
    );
    Checkout {
        app,
        student,
        course,
        purchase,
    }
}

fn session_event(event_id: &str, kind: &str, purchase_id: &str, amount: i64, payment_status: &str) -> Value {
    json!({
        "id": event_id,
        "type": kind,
        "data": {"object": {
            "id": "cs_test_1",
            "payment_status": payment_status,
            "payment_intent": "pi_test_1",
            "amount_total": amount,
            "currency": "usd",
            "metadata": {"purchase_id": purchase_id}
        }}
    })
}

fn paid_event(event_id: &str, purchase_id: &str) -> Value {
    session_event(event_id, "checkout.session.completed", purchase_id, 5000, "paid")
}

fn refund_event(event_id: &str, amount_refunded: i64) -> Value {
    json!({
        "id": event_id,
        "type": "charge.refunded",
        "data": {"object": {
            "id": "ch_test_1",
            "payment_intent": "pi_test_1",
            "amount": 5000,
            "amount_refunded": amount_refunded,
            "refunded": amount_refunded >= 5000
        }}
    })
}

impl Checkout {
    async fn deliver(&self, event: &Value) -> (StatusCode, Value) {
        self.app.send(stripe_webhook_request(event)).await
    }

    fn status(&self) -> PurchaseStatus {
        purchase_status(&self.app.conn(), &self.purchase.id)
    }

    fn enrolled(&self) -> bool {
        queries::has_active_enrollment(&self.app.conn(), &self.student.id, &self.course.id).unwrap()
    }
}

#[tokio::test]
async fn completed_session_fulfills_purchase() {
    let c = checkout();

    let (status, body) = c.deliver(&paid_event("evt_1", &c.purchase.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    assert_eq!(c.status(), PurchaseStatus::Paid);
    assert!(c.enrolled());

    let conn = c.app.conn();
    let purchase = queries::get_purchase_by_id(&conn, &c.purchase.id).unwrap().unwrap();
    assert_eq!(purchase.provider_payment_id.as_deref(), Some("pi_test_1"));
    assert!(purchase.paid_at.is_some());

    let transactions = queries::list_transactions_for_purchase(&conn, &c.purchase.id).unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].total_cents, 5000);
    assert_eq!(queries::count_unread_notifications(&conn, &c.student.id).unwrap(), 1);
}

#[tokio::test]
async fn replayed_event_is_processed_once() {
    let c = checkout();
    let event = paid_event("evt_replay", &c.purchase.id);

    c.deliver(&event).await;
    let (status, body) = c.deliver(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Already processed");

    let transactions = queries::list_transactions_for_purchase(&c.app.conn(), &c.purchase.id).unwrap();
    assert_eq!(transactions.len(), 1);
}

#[tokio::test]
async fn unpaid_completion_waits_for_async_payment() {
    let c = checkout();

    let event = session_event("evt_1", "checkout.session.completed", &c.purchase.id, 5000, "unpaid");
    let (status, _) = c.deliver(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(c.status(), PurchaseStatus::Pending);

    let event = session_event(
        "evt_2",
        "checkout.session.async_payment_succeeded",
        &c.purchase.id,
        5000,
        "paid",
    );
    c.deliver(&event).await;
    assert_eq!(c.status(), PurchaseStatus::Paid);
}

#[tokio::test]
async fn amount_mismatch_fails_purchase() {
    let c = checkout();

    let event = session_event("evt_1", "checkout.session.completed", &c.purchase.id, 100, "paid");
    let (status, _) = c.deliver(&event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(c.status(), PurchaseStatus::Failed);
    assert!(!c.enrolled());

    let purchase = queries::get_purchase_by_id(&c.app.conn(), &c.purchase.id).unwrap().unwrap();
    assert_eq!(purchase.failure_reason.as_deref(), Some("amount_mismatch"));
}

#[tokio::test]
async fn expiry_after_payment_does_not_downgrade() {
    let c = checkout();
    c.deliver(&paid_event("evt_1", &c.purchase.id)).await;

    let expired = session_event("evt_2", "checkout.session.expired", &c.purchase.id, 5000, "unpaid");
    let (status, body) = c.deliver(&expired).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Ignored: status unchanged");
    assert_eq!(c.status(), PurchaseStatus::Paid);
    assert!(c.enrolled());
}

#[tokio::test]
async fn late_payment_recovers_failed_purchase() {
    let c = checkout();

    let failed = session_event(
        "evt_1",
        "checkout.session.async_payment_failed",
        &c.purchase.id,
        5000,
        "unpaid",
    );
    c.deliver(&failed).await;
    assert_eq!(c.status(), PurchaseStatus::Failed);

    c.deliver(&paid_event("evt_2", &c.purchase.id)).await;
    assert_eq!(c.status(), PurchaseStatus::Paid);
    assert!(c.enrolled());
}

#[tokio::test]
async fn full_refund_revokes_access() {
    let c = checkout();
    c.deliver(&paid_event("evt_1", &c.purchase.id)).await;

    let (status, body) = c.deliver(&refund_event("evt_2", 5000)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    assert_eq!(c.status(), PurchaseStatus::Refunded);
    assert!(!c.enrolled());

    let transactions = queries::list_transactions_for_purchase(&c.app.conn(), &c.purchase.id).unwrap();
    assert_eq!(transactions.len(), 2);
    let refund = transactions
        .iter()
        .find(|t| t.total_cents < 0)
        .expect("refund transaction");
    assert_eq!(refund.total_cents, -5000);
    assert!(refund.parent_transaction_id.is_some());
}

#[tokio::test]
async fn partial_refund_keeps_access() {
    let c = checkout();
    c.deliver(&paid_event("evt_1", &c.purchase.id)).await;

    let (status, body) = c.deliver(&refund_event("evt_2", 1000)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Event ignored");
    assert_eq!(c.status(), PurchaseStatus::Paid);
    assert!(c.enrolled());
}

#[tokio::test]
async fn unknown_purchase_is_acknowledged() {
    let c = checkout();
    let (status, body) = c.deliver(&paid_event("evt_1", "ch_pur_unknown")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Purchase not found");
    assert_eq!(c.status(), PurchaseStatus::Pending);
}

#[tokio::test]
async fn purchase_of_other_gateway_is_not_touched() {
    let c = checkout();
    let mp_purchase = create_pending_purchase(
        &mut c.app.conn(),
        &c.student.id,
        &[&c.course],
        PaymentProvider::MercadoPago,
    );

    let (_, body) = c.deliver(&paid_event("evt_1", &mp_purchase.id)).await;
    assert_eq!(body, "Purchase not found");
    assert_eq!(purchase_status(&c.app.conn(), &mp_purchase.id), PurchaseStatus::Pending);
}

fn signed_request(payload: &Value, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn signature_is_required() {
    let c = checkout();
    let event = paid_event("evt_1", &c.purchase.id);
    let body = serde_json::to_vec(&event).unwrap();

    let (status, _) = c.app.send(signed_request(&event, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let wrong = stripe_signature_header(&body, "whsec_wrong");
    let (status, _) = c.app.send(signed_request(&event, Some(wrong))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stale = stripe_signature_header_at(
        &body,
        STRIPE_WEBHOOK_SECRET,
        chrono::Utc::now().timestamp() - 600,
    );
    let (status, _) = c.app.send(signed_request(&event, Some(stale))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = c
        .app
        .send(signed_request(&event, Some("garbage".to_string())))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(c.status(), PurchaseStatus::Pending);
}

#[tokio::test]
async fn unconfigured_gateway_is_acknowledged() {
    let app = TestApp::new();
    let (status, body) = app
        .send(stripe_webhook_request(&paid_event("evt_1", "ch_pur_1")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Stripe not configured");
}
