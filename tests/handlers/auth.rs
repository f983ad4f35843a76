//! Sign-in flow and session handling

#[path = "../common/mod.rs"]
mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;

#[tokio::test]
async fn request_code_creates_account_on_first_use() {
    let app = TestApp::new();

    let (status, body) = app
        .send(json_request(
            "POST",
            "/auth/request-code",
            None,
            &json!({"email": "New.Student@Example.com", "name": "New Student"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());

    let user = queries::get_user_by_email(&app.conn(), "new.student@example.com")
        .unwrap()
        .expect("account should be created");
    assert_eq!(user.email, "new.student@example.com");
    assert_eq!(user.role, UserRole::Student);
}

#[tokio::test]
async fn request_code_requires_name_for_new_account() {
    let app = TestApp::new();

    let (status, _) = app
        .send(json_request(
            "POST",
            "/auth/request-code",
            None,
            &json!({"email": "nobody@example.com"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn request_code_response_does_not_reveal_existing_accounts() {
    let app = TestApp::new();
    create_test_user(&app.conn(), "known@example.com", UserRole::Student);

    let (_, existing) = app
        .send(json_request(
            "POST",
            "/auth/request-code",
            None,
            &json!({"email": "known@example.com"}),
        ))
        .await;
    let (_, created) = app
        .send(json_request(
            "POST",
            "/auth/request-code",
            None,
            &json!({"email": "fresh@example.com", "name": "Fresh"}),
        ))
        .await;
    assert_eq!(existing, created);
}

#[tokio::test]
async fn request_code_is_rate_limited_per_email() {
    let app = TestApp::new();
    create_test_user(&app.conn(), "busy@example.com", UserRole::Student);

    for _ in 0..5 {
        let (status, _) = app
            .send(json_request(
                "POST",
                "/auth/request-code",
                None,
                &json!({"email": "busy@example.com"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = app
        .send(json_request(
            "POST",
            "/auth/request-code",
            None,
            &json!({"email": "BUSY@example.com"}),
        ))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn verify_code_issues_session_once() {
    let app = TestApp::new();
    let user = create_test_user(&app.conn(), "student@example.com", UserRole::Student);
    queries::create_login_code(&app.conn(), &user.id, "123456", 900).unwrap();

    let (status, body) = app
        .send(json_request(
            "POST",
            "/auth/verify",
            None,
            &json!({"email": "student@example.com", "code": "123456"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], user.id.as_str());
    let token = body["token"].as_str().expect("token").to_string();

    let (status, me) = app.send(get("/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "student@example.com");

    // Codes are single use
    let (status, _) = app
        .send(json_request(
            "POST",
            "/auth/verify",
            None,
            &json!({"email": "student@example.com", "code": "123456"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verify_rejects_wrong_and_expired_codes() {
    let app = TestApp::new();
    let user = create_test_user(&app.conn(), "student@example.com", UserRole::Student);
    queries::create_login_code(&app.conn(), &user.id, "111111", 900).unwrap();
    queries::create_login_code(&app.conn(), &user.id, "222222", -1).unwrap();

    for code in ["999999", "222222"] {
        let (status, body) = app
            .send(json_request(
                "POST",
                "/auth/verify",
                None,
                &json!({"email": "student@example.com", "code": code}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "code {} should be rejected", code);
        assert_eq!(body["error"], "Bad request");
    }
}

#[tokio::test]
async fn protected_routes_require_valid_token() {
    let app = TestApp::new();

    let (status, _) = app.send(get("/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send(get("/me", Some("not-a-token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signed with another secret
    let other = SessionKeys::new("another-secret", 1);
    let (forged, _) = other.issue("ch_usr_00000000000000000000000000000000", UserRole::Admin).unwrap();
    let (status, _) = app.send(get("/me", Some(&forged))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_is_read_from_database_not_token() {
    let app = TestApp::new();
    let conn = app.conn();
    let user = create_test_user(&conn, "instructor@example.com", UserRole::Instructor);
    let token = token_for(&app.state, &user);

    let (status, _) = app.send(get("/admin/courses", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);

    queries::set_user_role(&conn, &user.id, UserRole::Student).unwrap();
    let (status, _) = app.send(get("/admin/courses", Some(&token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn update_profile_changes_name() {
    let app = TestApp::new();
    let user = create_test_user(&app.conn(), "student@example.com", UserRole::Student);
    let token = token_for(&app.state, &user);

    let (status, body) = app
        .send(json_request("PUT", "/me", Some(&token), &json!({"name": "Renamed"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Renamed");

    let (status, _) = app
        .send(json_request("PUT", "/me", Some(&token), &json!({"name": "   "})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
