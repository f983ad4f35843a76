//! Support conversations and live chat fan-out

#[path = "../common/mod.rs"]
mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;

struct Desk {
    app: TestApp,
    student: User,
    student_token: String,
    admin_token: String,
}

fn desk() -> Desk {
    let app = TestApp::new();
    let conn = app.conn();
    let student = create_test_user(&conn, "student@example.com", UserRole::Student);
    let admin = create_test_user(&conn, "admin@example.com", UserRole::Admin);
    drop(conn);
    let student_token = token_for(&app.state, &student);
    let admin_token = token_for(&app.state, &admin);
    Desk {
        app,
        student,
        student_token,
        admin_token,
    }
}

async fn open_conversation(desk: &Desk) -> String {
    let (status, body) = desk
        .app
        .send(json_request(
            "POST",
            "/support/conversations",
            Some(&desk.student_token),
            &json!({"subject": "Video won't play", "message": "Lesson 2 is stuck"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "open");
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    body["id"].as_str().unwrap().to_string()
}

fn post_body(body: &str) -> serde_json::Value {
    json!({ "body": body })
}

#[tokio::test]
async fn create_conversation_validates_input() {
    let desk = desk();
    let (status, _) = desk
        .app
        .send(json_request(
            "POST",
            "/support/conversations",
            Some(&desk.student_token),
            &json!({"subject": " ", "message": "hello"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = desk
        .app
        .send(json_request(
            "POST",
            "/support/conversations",
            Some(&desk.student_token),
            &json!({"subject": "Help", "message": ""}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn staff_reply_notifies_the_owner() {
    let desk = desk();
    let id = open_conversation(&desk).await;
    let uri = format!("/support/conversations/{}/messages", id);

    // The owner's own message does not notify them
    let (status, _) = desk
        .app
        .send(json_request("POST", &uri, Some(&desk.student_token), &post_body("Any news?")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        queries::count_unread_notifications(&desk.app.conn(), &desk.student.id).unwrap(),
        0
    );

    let (status, reply) = desk
        .app
        .send(json_request("POST", &uri, Some(&desk.admin_token), &post_body("Fixed, try again")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["conversation_id"], id.as_str());

    let (_, notifications) = desk.app.send(get("/notifications", Some(&desk.student_token))).await;
    assert_eq!(notifications["total"], 1);
    assert_eq!(notifications["items"][0]["kind"], "support_reply");

    let (_, thread) = desk.app.send(get(&uri, Some(&desk.student_token))).await;
    let bodies: Vec<&str> = thread["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, ["Lesson 2 is stuck", "Any news?", "Fixed, try again"]);
}

#[tokio::test]
async fn conversations_are_hidden_from_other_students() {
    let desk = desk();
    let id = open_conversation(&desk).await;
    let other = create_test_user(&desk.app.conn(), "other@example.com", UserRole::Student);
    let other_token = token_for(&desk.app.state, &other);

    let (status, _) = desk
        .app
        .send(get(&format!("/support/conversations/{}/messages", id), Some(&other_token)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = desk
        .app
        .send(json_request(
            "POST",
            &format!("/support/conversations/{}/messages", id),
            Some(&other_token),
            &post_body("hijack"),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, mine) = desk.app.send(get("/support/conversations", Some(&other_token))).await;
    assert_eq!(mine["total"], 0);

    let (_, all) = desk.app.send(get("/support/conversations", Some(&desk.admin_token))).await;
    assert_eq!(all["total"], 1);
}

#[tokio::test]
async fn closed_conversation_rejects_messages() {
    let desk = desk();
    let id = open_conversation(&desk).await;

    let (status, body) = desk
        .app
        .send(empty_request(
            "POST",
            &format!("/support/conversations/{}/close", id),
            Some(&desk.admin_token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");

    let (status, _) = desk
        .app
        .send(json_request(
            "POST",
            &format!("/support/conversations/{}/messages", id),
            Some(&desk.student_token),
            &post_body("still there?"),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, open) = desk
        .app
        .send(get("/support/conversations?status=open", Some(&desk.admin_token)))
        .await;
    assert_eq!(open["total"], 0);
}

#[tokio::test]
async fn posted_messages_reach_live_subscribers() {
    let desk = desk();
    let id = open_conversation(&desk).await;
    let mut receiver = desk.app.state.chat.subscribe(&id);

    desk.app
        .send(json_request(
            "POST",
            &format!("/support/conversations/{}/messages", id),
            Some(&desk.admin_token),
            &post_body("Live reply"),
        ))
        .await;

    let message = receiver.try_recv().expect("message should be broadcast");
    assert_eq!(message.conversation_id, id);
    assert_eq!(message.body, "Live reply");

    drop(receiver);
    assert_eq!(desk.app.state.chat.prune(), 1);
    assert_eq!(desk.app.state.chat.channel_count(), 0);
}
