//! Lesson video upload and ranged streaming

#[path = "../common/mod.rs"]
mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use common::*;
use tower::ServiceExt;

const VIDEO: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

struct Studio {
    app: TestApp,
    instructor_token: String,
    lessons: Vec<Lesson>,
}

async fn studio() -> Studio {
    let app = TestApp::new();
    let conn = app.conn();
    let instructor = create_test_user(&conn, "instructor@example.com", UserRole::Instructor);
    let (_, lessons) = create_test_course(&conn, &instructor.id, "video-course", 2000, 2, true);
    drop(conn);
    let instructor_token = token_for(&app.state, &instructor);
    let studio = Studio {
        app,
        instructor_token,
        lessons,
    };
    for lesson in &studio.lessons {
        let (status, _) = studio.upload(&lesson.id, VIDEO).await;
        assert_eq!(status, StatusCode::OK);
    }
    studio
}

impl Studio {
    async fn upload(&self, lesson_id: &str, bytes: &'static [u8]) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/admin/lessons/{}/video", lesson_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.instructor_token))
            .header(header::CONTENT_TYPE, "video/mp4")
            .body(Body::from(bytes))
            .unwrap();
        self.app.send(request).await
    }

    async fn stream(&self, uri: &str, token: Option<&str>, range: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        self.app
            .router()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn video_uri(&self, index: usize) -> String {
        format!("/learn/lessons/{}/video", self.lessons[index].id)
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

#[tokio::test]
async fn upload_records_video_metadata() {
    let studio = studio().await;
    let (status, lesson) = studio.upload(&studio.lessons[1].id, b"replacement").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lesson["video_content_type"], "video/mp4");
    assert_eq!(lesson["video_size"], 11);
    assert!(lesson.get("video_blob").is_none());

    let (status, _) = studio.upload(&studio.lessons[1].id, b"").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn preview_video_streams_without_login() {
    let studio = studio().await;
    let response = studio.stream(&studio.video_uri(0), None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(body_bytes(response).await, VIDEO);
}

#[tokio::test]
async fn paid_video_requires_enrollment() {
    let studio = studio().await;

    let response = studio.stream(&studio.video_uri(1), None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let student = create_test_user(&studio.app.conn(), "student@example.com", UserRole::Student);
    let token = token_for(&studio.app.state, &student);
    let response = studio.stream(&studio.video_uri(1), Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    queries::grant_enrollment(
        &studio.app.conn(),
        &student.id,
        &studio.lessons[1].course_id,
        None,
    )
    .unwrap();

    // Players pass the session as a query parameter
    let uri = format!("{}?token={}", studio.video_uri(1), token);
    let response = studio.stream(&uri, None, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = studio
        .stream(&format!("{}?token=garbage", studio.video_uri(1)), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn range_requests_return_partial_content() {
    let studio = studio().await;
    let uri = studio.video_uri(0);

    let response = studio.stream(&uri, None, Some("bytes=10-19")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 10-19/36");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
    assert_eq!(body_bytes(response).await, b"abcdefghij");

    let response = studio.stream(&uri, None, Some("bytes=30-")).await;
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 30-35/36");
    assert_eq!(body_bytes(response).await, b"uvwxyz");

    let response = studio.stream(&uri, None, Some("bytes=-4")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(body_bytes(response).await, b"wxyz");
}

#[tokio::test]
async fn range_past_the_end_is_unsatisfiable() {
    let studio = studio().await;
    let response = studio.stream(&studio.video_uri(0), None, Some("bytes=100-200")).await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */36");
}

#[tokio::test]
async fn removed_video_is_not_found() {
    let studio = studio().await;
    let uri = format!("/admin/lessons/{}/video", studio.lessons[0].id);

    let (status, _) = studio
        .app
        .send(empty_request("DELETE", &uri, Some(&studio.instructor_token)))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let response = studio.stream(&studio.video_uri(0), None, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, _) = studio
        .app
        .send(empty_request("DELETE", &uri, Some(&studio.instructor_token)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
