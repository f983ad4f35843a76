//! Lesson access, progress tracking and certificates

#[path = "../common/mod.rs"]
mod common;

use axum::body::to_bytes;
use axum::http::{StatusCode, header};
use common::*;
use serde_json::json;
use tower::ServiceExt;

struct Classroom {
    app: TestApp,
    student: User,
    token: String,
    course: Course,
    lessons: Vec<Lesson>,
}

fn classroom(enrolled: bool) -> Classroom {
    let app = TestApp::new();
    let conn = app.conn();
    let instructor = create_test_user(&conn, "instructor@example.com", UserRole::Instructor);
    let student = create_test_user(&conn, "student@example.com", UserRole::Student);
    let (course, lessons) = create_test_course(&conn, &instructor.id, "rust-basics", 5000, 2, true);
    if enrolled {
        queries::grant_enrollment(&conn, &student.id, &course.id, None).unwrap();
    }
    drop(conn);
    let token = token_for(&app.state, &student);
    Classroom {
        app,
        student,
        token,
        course,
        lessons,
    }
}

impl Classroom {
    fn lesson_uri(&self, index: usize) -> String {
        format!("/learn/courses/{}/lessons/{}", self.course.id, self.lessons[index].id)
    }

    async fn report(&self, index: usize, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.app
            .send(json_request(
                "POST",
                &format!("{}/progress", self.lesson_uri(index)),
                Some(&self.token),
                &body,
            ))
            .await
    }
}

#[tokio::test]
async fn lessons_require_enrollment_except_previews() {
    let room = classroom(false);

    let (status, lesson) = room.app.send(get(&room.lesson_uri(0), Some(&room.token))).await;
    assert_eq!(status, StatusCode::OK, "preview lesson is open");
    assert_eq!(lesson["title"], "Lesson 1");

    let (status, _) = room.app.send(get(&room.lesson_uri(1), Some(&room.token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = room.report(0, json!({"watched_seconds": 10})).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "progress needs an enrollment");
}

#[tokio::test]
async fn lesson_must_belong_to_course_in_path() {
    let room = classroom(true);
    let uri = format!("/learn/courses/ch_crs_other/lessons/{}", room.lessons[1].id);
    let (status, _) = room.app.send(get(&uri, Some(&room.token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn watched_time_never_decreases() {
    let room = classroom(true);

    let (status, body) = room.report(1, json!({"watched_seconds": 50})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lesson"]["watched_seconds"], 50);

    let (_, body) = room.report(1, json!({"watched_seconds": 20})).await;
    assert_eq!(body["lesson"]["watched_seconds"], 50);
    assert_eq!(body["lesson"]["completed"], false);
    assert_eq!(body["course"]["percentage"], 0);
}

#[tokio::test]
async fn out_of_range_watched_time_is_rejected() {
    let room = classroom(true);

    let (status, _) = room
        .report(1, json!({"watched_seconds": i64::MAX}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = room.report(1, json!({"watched_seconds": -5})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn completing_course_issues_single_certificate() {
    let room = classroom(true);

    // 90% of a 100 second lesson completes it
    let (_, body) = room.report(0, json!({"watched_seconds": 90})).await;
    assert_eq!(body["lesson"]["completed"], true);
    assert_eq!(body["course"]["percentage"], 50);
    assert!(body["course"]["certificate_id"].is_null());

    let (status, body) = room.report(1, json!({"completed": true})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["course"]["percentage"], 100);
    let certificate_id = body["course"]["certificate_id"].as_str().unwrap().to_string();

    // Reporting again does not issue another one
    let (_, body) = room.report(1, json!({"watched_seconds": 100})).await;
    assert_eq!(body["course"]["certificate_id"], certificate_id.as_str());

    let (_, certificates) = room.app.send(get("/certificates", Some(&room.token))).await;
    let certificates = certificates.as_array().unwrap();
    assert_eq!(certificates.len(), 1);
    assert_eq!(certificates[0]["course_title"], room.course.title.as_str());
    assert_eq!(certificates[0]["student_name"], room.student.name.as_str());

    let (_, notifications) = room.app.send(get("/notifications", Some(&room.token))).await;
    assert_eq!(notifications["items"][0]["kind"], "certificate_issued");

    let (_, progress) = room
        .app
        .send(get(
            &format!("/learn/courses/{}/progress", room.course.id),
            Some(&room.token),
        ))
        .await;
    assert_eq!(progress["completed_lessons"], 2);
    assert_eq!(progress["certificate_id"], certificate_id.as_str());
}

#[tokio::test]
async fn certificate_verification_is_public() {
    let room = classroom(true);
    room.report(0, json!({"completed": true})).await;
    room.report(1, json!({"completed": true})).await;

    let certificate = queries::list_certificates_for_user(&room.app.conn(), &room.student.id)
        .unwrap()
        .remove(0);

    let (status, body) = room
        .app
        .send(get(
            &format!("/certificates/verify/{}", certificate.verification_code.to_lowercase()),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["course_title"], room.course.title.as_str());

    let (status, body) = room.app.send(get("/certificates/verify/NOPE-NOPE", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"valid": false}));
}

#[tokio::test]
async fn certificate_pdf_download() {
    let room = classroom(true);
    room.report(0, json!({"completed": true})).await;
    room.report(1, json!({"completed": true})).await;
    let certificate = queries::list_certificates_for_user(&room.app.conn(), &room.student.id)
        .unwrap()
        .remove(0);
    let uri = format!("/certificates/{}/pdf", certificate.id);

    let response = room
        .app
        .router()
        .oneshot(get(&uri, Some(&room.token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment;"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"%PDF-"));

    // Other students cannot download it
    let other = create_test_user(&room.app.conn(), "other@example.com", UserRole::Student);
    let (status, _) = room
        .app
        .send(get(&uri, Some(&token_for(&room.app.state, &other))))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notifications_can_be_marked_read() {
    let room = classroom(true);
    room.report(0, json!({"completed": true})).await;
    room.report(1, json!({"completed": true})).await;

    let (_, unread) = room.app.send(get("/notifications/unread-count", Some(&room.token))).await;
    assert_eq!(unread["unread"], 1);

    let (_, list) = room.app.send(get("/notifications", Some(&room.token))).await;
    let id = list["items"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = room
        .app
        .send(empty_request("POST", &format!("/notifications/{}/read", id), Some(&room.token)))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, unread) = room.app.send(get("/notifications/unread-count", Some(&room.token))).await;
    assert_eq!(unread["unread"], 0);

    let (status, _) = room
        .app
        .send(empty_request("POST", "/notifications/ch_ntf_missing/read", Some(&room.token)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, marked) = room
        .app
        .send(empty_request("POST", "/notifications/read-all", Some(&room.token)))
        .await;
    assert_eq!(marked["updated"], 0);
}

#[tokio::test]
async fn revoked_enrollment_loses_access() {
    let room = classroom(true);
    let (status, _) = room.app.send(get(&room.lesson_uri(1), Some(&room.token))).await;
    assert_eq!(status, StatusCode::OK);

    room.app
        .conn()
        .execute(
            "UPDATE enrollments SET revoked_at = 1 WHERE user_id = ?1",
            [&room.student.id],
        )
        .unwrap();

    let (status, _) = room.app.send(get(&room.lesson_uri(1), Some(&room.token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, courses) = room.app.send(get("/learn/courses", Some(&room.token))).await;
    assert!(courses.as_array().unwrap().is_empty());
}
