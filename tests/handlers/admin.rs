//! Staff course authoring and admin-only operations

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use common::*;
use serde_json::{Value, json};

struct Staff {
    app: TestApp,
    admin: User,
    admin_token: String,
    instructor_token: String,
    student_token: String,
}

fn staff() -> Staff {
    let app = TestApp::new();
    let conn = app.conn();
    let admin = create_test_user(&conn, "admin@example.com", UserRole::Admin);
    let instructor = create_test_user(&conn, "instructor@example.com", UserRole::Instructor);
    let student = create_test_user(&conn, "student@example.com", UserRole::Student);
    drop(conn);
    Staff {
        admin_token: token_for(&app.state, &admin),
        instructor_token: token_for(&app.state, &instructor),
        student_token: token_for(&app.state, &student),
        admin,
        app,
    }
}

fn new_course(slug: &str) -> serde_json::Value {
    json!({
        "slug": slug,
        "title": "Systems Programming",
        "description": "Pointers without fear",
        "price_cents": 7900,
    })
}

#[tokio::test]
async fn students_cannot_reach_staff_routes() {
    let staff = staff();

    let (status, _) = staff.app.send(get("/admin/courses", Some(&staff.student_token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Instructors are staff but not admins
    let (status, _) = staff.app.send(get("/admin/users", Some(&staff.instructor_token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = staff.app.send(get("/admin/users", Some(&staff.admin_token))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn instructor_builds_and_publishes_a_course() {
    let staff = staff();
    let token = Some(staff.instructor_token.as_str());

    let (status, course) = staff
        .app
        .send(json_request("POST", "/admin/courses", token, &new_course("systems")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(course["published"], false);
    assert_eq!(course["currency"], "usd");
    let course_id = course["id"].as_str().unwrap().to_string();

    // Slugs are unique and validated
    let (status, _) = staff
        .app
        .send(json_request("POST", "/admin/courses", token, &new_course("systems")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = staff
        .app
        .send(json_request("POST", "/admin/courses", token, &new_course("Bad Slug")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let publish = format!("/admin/courses/{}/publish", course_id);
    let (status, _) = staff.app.send(empty_request("POST", &publish, token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "no lessons yet");

    let (status, module) = staff
        .app
        .send(json_request(
            "POST",
            &format!("/admin/courses/{}/modules", course_id),
            token,
            &json!({"title": "Memory"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = staff
        .app
        .send(json_request(
            "POST",
            &format!("/admin/modules/{}/lessons", module["id"].as_str().unwrap()),
            token,
            &json!({"title": "The stack", "content": "Frames", "duration_seconds": 300}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, published) = staff.app.send(empty_request("POST", &publish, token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(published["published"], true);

    let (status, catalog) = staff.app.send(get("/courses/systems", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(catalog["modules"][0]["lessons"][0]["title"], "The stack");
}

#[tokio::test]
async fn instructors_cannot_edit_each_others_courses() {
    let staff = staff();
    let conn = staff.app.conn();
    let rival = create_test_user(&conn, "rival@example.com", UserRole::Instructor);
    let (course, _) = create_test_course(&conn, &rival.id, "rival-course", 1000, 1, true);
    drop(conn);

    let uri = format!("/admin/courses/{}", course.id);
    let (status, _) = staff
        .app
        .send(json_request(
            "PUT",
            &uri,
            Some(&staff.instructor_token),
            &json!({"title": "Mine now"}),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, listed) = staff.app.send(get("/admin/courses", Some(&staff.instructor_token))).await;
    assert_eq!(listed["total"], 0);

    let (status, _) = staff
        .app
        .send(json_request("PUT", &uri, Some(&staff.admin_token), &json!({"title": "Edited"})))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn course_with_purchases_is_only_hidden() {
    let staff = staff();
    let conn = staff.app.conn();
    let student = create_test_user(&conn, "buyer@example.com", UserRole::Student);
    let (sold, _) = create_test_course(&conn, &staff.admin.id, "sold", 1000, 1, true);
    let (unsold, _) = create_test_course(&conn, &staff.admin.id, "unsold", 1000, 1, true);
    drop(conn);
    create_pending_purchase(&mut staff.app.conn(), &student.id, &[&sold], PaymentProvider::Stripe);

    let (status, body) = staff
        .app
        .send(empty_request(
            "DELETE",
            &format!("/admin/courses/{}", sold.id),
            Some(&staff.admin_token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hard_deleted"], false);

    let (_, body) = staff
        .app
        .send(empty_request(
            "DELETE",
            &format!("/admin/courses/{}", unsold.id),
            Some(&staff.admin_token),
        ))
        .await;
    assert_eq!(body["hard_deleted"], true);

    let (status, _) = staff.app.send(get("/courses/sold", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn last_admin_cannot_be_demoted() {
    let staff = staff();
    let uri = format!("/admin/users/{}/role", staff.admin.id);

    let (status, _) = staff
        .app
        .send(json_request("PUT", &uri, Some(&staff.admin_token), &json!({"role": "student"})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let second = create_test_user(&staff.app.conn(), "second@example.com", UserRole::Admin);
    let (status, user) = staff
        .app
        .send(json_request(
            "PUT",
            &format!("/admin/users/{}/role", second.id),
            Some(&staff.admin_token),
            &json!({"role": "instructor"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["role"], "instructor");
}

#[tokio::test]
async fn deleting_a_used_coupon_deactivates_it() {
    let staff = staff();
    let conn = staff.app.conn();
    let used = create_test_coupon(&conn, "USED", CouponKind::Percentage, 10, None);
    queries::increment_coupon_usage(&conn, &used.id).unwrap();
    let fresh = create_test_coupon(&conn, "FRESH", CouponKind::Percentage, 10, None);
    drop(conn);

    for coupon in [&used, &fresh] {
        let (status, _) = staff
            .app
            .send(empty_request(
                "DELETE",
                &format!("/admin/coupons/{}", coupon.id),
                Some(&staff.admin_token),
            ))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let conn = staff.app.conn();
    let used = queries::get_coupon_by_id(&conn, &used.id).unwrap().unwrap();
    assert!(!used.active);
    assert!(queries::get_coupon_by_id(&conn, &fresh.id).unwrap().is_none());
}

#[tokio::test]
async fn coupon_codes_are_unique() {
    let staff = staff();
    let body = json!({"code": "spring", "kind": "percentage", "value": 15});

    let (status, coupon) = staff
        .app
        .send(json_request("POST", "/admin/coupons", Some(&staff.admin_token), &body))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(coupon["code"], "SPRING");

    let (status, _) = staff
        .app
        .send(json_request("POST", "/admin/coupons", Some(&staff.admin_token), &body))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = staff
        .app
        .send(json_request(
            "POST",
            "/admin/coupons",
            Some(&staff.admin_token),
            &json!({"code": "TOO-MUCH", "kind": "percentage", "value": 150}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

async fn wait_until_sent(app: &TestApp, id: &str) -> Campaign {
    for _ in 0..50 {
        let campaign = queries::get_campaign(&app.conn(), id).unwrap().unwrap();
        if campaign.status == CampaignStatus::Sent {
            return campaign;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("campaign {} did not finish sending", id);
}

#[tokio::test]
async fn campaign_is_delivered_to_active_subscribers_once() {
    let staff = staff();
    for email in ["a@example.com", "b@example.com", "c@example.com"] {
        let (status, _) = staff
            .app
            .send(json_request("POST", "/newsletter/subscribe", None, &json!({"email": email})))
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    let leaving = queries::subscribe(&staff.app.conn(), "c@example.com").unwrap();
    let (status, _) = staff
        .app
        .send(get(
            &format!("/newsletter/unsubscribe?token={}", leaving.unsubscribe_token),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, campaign) = staff
        .app
        .send(json_request(
            "POST",
            "/admin/newsletter/campaigns",
            Some(&staff.admin_token),
            &json!({"subject": "New course", "body": "Async Rust is live"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(campaign["status"], "draft");
    let id = campaign["id"].as_str().unwrap().to_string();

    let send = format!("/admin/newsletter/campaigns/{}/send", id);
    let (status, started) = staff
        .app
        .send(empty_request("POST", &send, Some(&staff.admin_token)))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["total_recipients"], 2);

    let (status, _) = staff
        .app
        .send(empty_request("POST", &send, Some(&staff.admin_token)))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let campaign = wait_until_sent(&staff.app, &id).await;
    assert_eq!(campaign.sent_count, 2);
    assert_eq!(campaign.failed_count, 0);
    assert!(campaign.completed_at.is_some());
}

#[tokio::test]
async fn campaign_counts_rejected_deliveries() {
    // Resend-compatible endpoint that refuses one address
    let mock = Router::new().route(
        "/emails",
        post(|Json(email): Json<Value>| async move {
            if email["to"][0] == "bounce@example.com" {
                Err((StatusCode::UNPROCESSABLE_ENTITY, "invalid recipient"))
            } else {
                Ok(Json(json!({"id": "em_test"})))
            }
        }),
    );
    let base = spawn_mock_server(mock).await;

    let mut staff = staff();
    staff.app.state.email_service = Arc::new(
        EmailService::new(Some("re_test".to_string()), "news@example.com".to_string())
            .with_endpoint(format!("{}/emails", base), vec![]),
    );
    let conn = staff.app.conn();
    queries::subscribe(&conn, "reader@example.com").unwrap();
    queries::subscribe(&conn, "bounce@example.com").unwrap();
    let campaign = queries::create_campaign(
        &conn,
        &staff.admin.id,
        &CreateCampaign {
            subject: "Hello".to_string(),
            body: "News".to_string(),
        },
    )
    .unwrap();
    drop(conn);

    let (status, _) = staff
        .app
        .send(empty_request(
            "POST",
            &format!("/admin/newsletter/campaigns/{}/send", campaign.id),
            Some(&staff.admin_token),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let campaign = wait_until_sent(&staff.app, &campaign.id).await;
    assert_eq!(campaign.sent_count, 1);
    assert_eq!(campaign.failed_count, 1);
}

#[tokio::test]
async fn broadcast_reaches_course_enrollees_only() {
    let staff = staff();
    let conn = staff.app.conn();
    let (course, _) = create_test_course(&conn, &staff.admin.id, "broadcast", 1000, 1, true);
    let enrolled = create_test_user(&conn, "enrolled@example.com", UserRole::Student);
    let outsider = create_test_user(&conn, "outsider@example.com", UserRole::Student);
    queries::grant_enrollment(&conn, &enrolled.id, &course.id, None).unwrap();
    drop(conn);

    let (status, _) = staff
        .app
        .send(json_request(
            "POST",
            "/admin/notifications",
            Some(&staff.admin_token),
            &json!({"course_id": course.id, "title": "Live Q&A", "body": "Friday at 5"}),
        ))
        .await;
    assert!(status.is_success());

    let conn = staff.app.conn();
    assert_eq!(queries::count_unread_notifications(&conn, &enrolled.id).unwrap(), 1);
    assert_eq!(queries::count_unread_notifications(&conn, &outsider.id).unwrap(), 0);
}

#[tokio::test]
async fn mutations_are_audited() {
    let staff = staff();
    staff
        .app
        .send(json_request(
            "POST",
            "/admin/courses",
            Some(&staff.admin_token),
            &new_course("audited"),
        ))
        .await;

    let (status, logs) = staff
        .app
        .send(get("/admin/audit-logs?action=create_course", Some(&staff.admin_token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 1);
    assert_eq!(logs["items"][0]["user_id"], staff.admin.id.as_str());
    assert_eq!(logs["items"][0]["resource_type"], "course");
    assert!(logs["items"][0]["formatted"].is_string());
}

#[tokio::test]
async fn course_report_counts_enrollments() {
    let staff = staff();
    let conn = staff.app.conn();
    let (course, _) = create_test_course(&conn, &staff.admin.id, "reported", 1000, 1, true);
    let student = create_test_user(&conn, "learner@example.com", UserRole::Student);
    queries::grant_enrollment(&conn, &student.id, &course.id, None).unwrap();
    drop(conn);

    let (status, rows) = staff.app.send(get("/admin/reports/courses", Some(&staff.admin_token))).await;
    assert_eq!(status, StatusCode::OK);
    let row = rows
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["course_id"] == course.id.as_str())
        .expect("course should be reported");
    assert_eq!(row["active_enrollments"], 1);
    assert_eq!(row["completions"], 0);

    let (status, sales) = staff.app.send(get("/admin/reports/sales", Some(&staff.admin_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(sales["by_currency"].as_array().unwrap().is_empty());
}
