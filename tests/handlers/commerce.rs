//! Cart, coupons and checkout

#[path = "../common/mod.rs"]
mod common;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use common::*;
use serde_json::json;

struct Shop {
    app: TestApp,
    token: String,
    student: User,
    course: Course,
    other: Course,
}

fn shop_with(app: TestApp) -> Shop {
    let conn = app.conn();
    let instructor = create_test_user(&conn, "instructor@example.com", UserRole::Instructor);
    let student = create_test_user(&conn, "student@example.com", UserRole::Student);
    let (course, _) = create_test_course(&conn, &instructor.id, "rust-basics", 5000, 2, true);
    let (other, _) = create_test_course(&conn, &instructor.id, "async-rust", 3000, 1, true);
    drop(conn);
    let token = token_for(&app.state, &student);
    Shop {
        app,
        token,
        student,
        course,
        other,
    }
}

fn shop() -> Shop {
    shop_with(TestApp::new())
}

async fn add_to_cart(shop: &Shop, course_id: &str) -> StatusCode {
    shop.app
        .send(json_request(
            "POST",
            "/cart/items",
            Some(&shop.token),
            &json!({"course_id": course_id}),
        ))
        .await
        .0
}

#[tokio::test]
async fn cart_add_is_idempotent() {
    let shop = shop();

    assert_eq!(add_to_cart(&shop, &shop.course.id).await, StatusCode::CREATED);
    assert_eq!(add_to_cart(&shop, &shop.course.id).await, StatusCode::OK);
    assert_eq!(add_to_cart(&shop, &shop.other.id).await, StatusCode::CREATED);

    let (status, cart) = shop.app.send(get("/cart", Some(&shop.token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["items"].as_array().unwrap().len(), 2);
    assert_eq!(cart["subtotals"][0]["currency"], "usd");
    assert_eq!(cart["subtotals"][0]["amount_cents"], 8000);
}

#[tokio::test]
async fn cart_rejects_unpublished_and_owned_courses() {
    let shop = shop();
    let conn = shop.app.conn();
    let instructor = create_test_user(&conn, "draft@example.com", UserRole::Instructor);
    let (draft, _) = create_test_course(&conn, &instructor.id, "draft", 1000, 1, false);
    queries::grant_enrollment(&conn, &shop.student.id, &shop.other.id, None).unwrap();
    drop(conn);

    assert_eq!(add_to_cart(&shop, &draft.id).await, StatusCode::BAD_REQUEST);
    assert_eq!(add_to_cart(&shop, &shop.other.id).await, StatusCode::CONFLICT);
    assert_eq!(add_to_cart(&shop, "ch_crs_missing").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn remove_and_clear_cart() {
    let shop = shop();
    add_to_cart(&shop, &shop.course.id).await;
    add_to_cart(&shop, &shop.other.id).await;

    let (status, cart) = shop
        .app
        .send(empty_request(
            "DELETE",
            &format!("/cart/items/{}", shop.course.id),
            Some(&shop.token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);

    let (status, _) = shop
        .app
        .send(empty_request("DELETE", "/cart", Some(&shop.token)))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, cart) = shop.app.send(get("/cart", Some(&shop.token))).await;
    assert!(cart["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn quote_applies_percentage_coupon() {
    let shop = shop();
    create_test_coupon(&shop.app.conn(), "SAVE20", CouponKind::Percentage, 20, None);
    add_to_cart(&shop, &shop.course.id).await;
    add_to_cart(&shop, &shop.other.id).await;

    let (status, quote) = shop
        .app
        .send(json_request(
            "POST",
            "/cart/quote",
            Some(&shop.token),
            &json!({"coupon_code": "save20"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["subtotal_cents"], 8000);
    assert_eq!(quote["discount_cents"], 1600);
    assert_eq!(quote["total_cents"], 6400);
    assert_eq!(quote["coupon"]["code"], "SAVE20");
    assert_eq!(quote["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn quote_rejects_unknown_and_exhausted_coupons() {
    let shop = shop();
    let coupon = create_test_coupon(&shop.app.conn(), "ONCE", CouponKind::Fixed, 500, Some(1));
    queries::increment_coupon_usage(&shop.app.conn(), &coupon.id).unwrap();
    add_to_cart(&shop, &shop.course.id).await;

    let (status, _) = shop
        .app
        .send(json_request(
            "POST",
            "/cart/quote",
            Some(&shop.token),
            &json!({"coupon_code": "NOPE"}),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = shop
        .app
        .send(json_request(
            "POST",
            "/cart/quote",
            Some(&shop.token),
            &json!({"coupon_code": "ONCE"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"].as_str().unwrap().contains("limit"));
}

#[tokio::test]
async fn checkout_with_empty_cart_is_rejected() {
    let shop = shop();
    let (status, _) = shop
        .app
        .send(json_request("POST", "/checkout", Some(&shop.token), &json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn paid_checkout_without_gateway_is_rejected() {
    let shop = shop();
    add_to_cart(&shop, &shop.course.id).await;

    let (status, _) = shop
        .app
        .send(json_request("POST", "/checkout", Some(&shop.token), &json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn free_checkout_enrolls_immediately() {
    let shop = shop();
    let coupon = create_test_coupon(&shop.app.conn(), "FREE", CouponKind::Percentage, 100, Some(10));
    add_to_cart(&shop, &shop.course.id).await;

    let (status, body) = shop
        .app
        .send(json_request(
            "POST",
            "/checkout",
            Some(&shop.token),
            &json!({"coupon_code": "FREE"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "paid");
    assert_eq!(body["total_cents"], 0);
    assert!(body["checkout_url"].is_null());

    let conn = shop.app.conn();
    let purchase_id = body["purchase_id"].as_str().unwrap();
    let purchase = queries::get_purchase_by_id(&conn, purchase_id).unwrap().unwrap();
    assert_eq!(purchase.provider, PaymentProvider::Free);
    assert!(queries::has_active_enrollment(&conn, &shop.student.id, &shop.course.id).unwrap());
    assert!(queries::get_cart_items(&conn, &shop.student.id).unwrap().is_empty());

    let coupon = queries::get_coupon_by_id(&conn, &coupon.id).unwrap().unwrap();
    assert_eq!(coupon.used_count, 1);

    let transactions = queries::list_transactions_for_purchase(&conn, purchase_id).unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].total_cents, 0);
    assert_eq!(transactions[0].discount_cents, 5000);

    let (_, courses) = shop.app.send(get("/learn/courses", Some(&shop.token))).await;
    assert_eq!(courses[0]["course_id"], shop.course.id.as_str());

    let (_, unread) = shop.app.send(get("/notifications/unread-count", Some(&shop.token))).await;
    assert_eq!(unread["unread"], 1);
}

#[tokio::test]
async fn checkout_rejects_course_already_owned() {
    let shop = shop();
    add_to_cart(&shop, &shop.course.id).await;
    queries::grant_enrollment(&shop.app.conn(), &shop.student.id, &shop.course.id, None).unwrap();

    let (status, _) = shop
        .app
        .send(json_request("POST", "/checkout", Some(&shop.token), &json!({})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn stripe_checkout_creates_pending_purchase() {
    let mock = Router::new().route(
        "/v1/checkout/sessions",
        post(|| async {
            Json(json!({"id": "cs_test_123", "url": "https://checkout.stripe.test/cs_test_123"}))
        }),
    );
    let base = spawn_mock_server(mock).await;
    let shop = shop_with(TestApp::with_gateways(Some(stripe_settings(&base)), None));
    add_to_cart(&shop, &shop.course.id).await;

    let (status, body) = shop
        .app
        .send(json_request("POST", "/checkout", Some(&shop.token), &json!({})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["total_cents"], 5000);
    assert_eq!(body["checkout_url"], "https://checkout.stripe.test/cs_test_123");

    let conn = shop.app.conn();
    let found = queries::find_purchase_by_checkout_id(&conn, PaymentProvider::Stripe, "cs_test_123")
        .unwrap()
        .expect("checkout id should be stored");
    assert_eq!(found.id, body["purchase_id"].as_str().unwrap());
    assert_eq!(found.status, PurchaseStatus::Pending);
    // Nothing is granted until the gateway confirms
    assert!(!queries::has_active_enrollment(&conn, &shop.student.id, &shop.course.id).unwrap());
    assert_eq!(queries::get_cart_items(&conn, &shop.student.id).unwrap().len(), 1);
}

#[tokio::test]
async fn gateway_failure_marks_purchase_failed() {
    let mock = Router::new().route(
        "/v1/checkout/sessions",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let base = spawn_mock_server(mock).await;
    let shop = shop_with(TestApp::with_gateways(Some(stripe_settings(&base)), None));
    add_to_cart(&shop, &shop.course.id).await;

    let (status, _) = shop
        .app
        .send(json_request("POST", "/checkout", Some(&shop.token), &json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, purchases) = shop.app.send(get("/purchases", Some(&shop.token))).await;
    assert_eq!(purchases["total"], 1);
    assert_eq!(purchases["items"][0]["status"], "failed");
    assert_eq!(purchases["items"][0]["failure_reason"], "checkout_failed");
}

#[tokio::test]
async fn purchases_are_private_to_their_owner() {
    let shop = shop();
    let conn = shop.app.conn();
    let purchase = create_pending_purchase(
        &mut *shop.app.conn(),
        &shop.student.id,
        &[&shop.course],
        PaymentProvider::Stripe,
    );
    let intruder = create_test_user(&conn, "intruder@example.com", UserRole::Student);
    let admin = create_test_user(&conn, "admin@example.com", UserRole::Admin);
    drop(conn);

    let uri = format!("/purchases/{}", purchase.id);
    let (status, body) = shop.app.send(get(&uri, Some(&shop.token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["course_id"], shop.course.id.as_str());

    let (status, _) = shop
        .app
        .send(get(&uri, Some(&token_for(&shop.app.state, &intruder))))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = shop
        .app
        .send(get(&uri, Some(&token_for(&shop.app.state, &admin))))
        .await;
    assert_eq!(status, StatusCode::OK);
}
