use axum::{
    extract::{
        Extension, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::fulfillment::notify_users;
use crate::middleware::{AuthContext, authenticate_token};
use crate::models::{
    AuditAction, ChatSocketQuery, ConversationListQuery, ConversationWithMessages,
    CreateConversation, NewNotification, NotificationKind, PostMessage, SupportConversation,
    SupportMessage, User, validate_message_body,
};
use crate::pagination::{Paginated, PaginationQuery};
use crate::util::AuditLogBuilder;

fn load_conversation(state: &AppState, user: &User, id: &str) -> Result<SupportConversation> {
    let conn = state.db.get()?;
    let conversation =
        queries::get_conversation(&conn, id)?.or_not_found(msg::CONVERSATION_NOT_FOUND)?;
    if !user.role.is_admin() && conversation.user_id != user.id {
        return Err(AppError::NotFound(msg::CONVERSATION_NOT_FOUND.into()));
    }
    Ok(conversation)
}

/// Persist a message, push it to live sockets, and notify the owner when
/// someone else replied.
fn post_message(
    state: &AppState,
    sender: &User,
    conversation: &SupportConversation,
    body: &str,
) -> Result<SupportMessage> {
    validate_message_body(body)?;
    let message = {
        let conn = state.db.get()?;
        queries::create_message(&conn, &conversation.id, &sender.id, body.trim())?
            .ok_or_else(|| AppError::Conflict(msg::CONVERSATION_CLOSED.into()))?
    };

    state.chat.publish(&message);

    if sender.id != conversation.user_id {
        let notification = NewNotification {
            kind: NotificationKind::SupportReply,
            title: format!("New reply: {}", conversation.subject),
            body: message.body.chars().take(200).collect(),
            link: Some(format!("/support/conversations/{}", conversation.id)),
        };
        if let Err(e) = notify_users(state, std::slice::from_ref(&conversation.user_id), &notification)
        {
            tracing::warn!(conversation_id = %conversation.id, "Failed to store reply notification: {}", e);
        }
    }

    Ok(message)
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(input): Json<CreateConversation>,
) -> Result<(StatusCode, Json<ConversationWithMessages>)> {
    input.validate()?;
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;
    let conversation = queries::create_conversation(&tx, ctx.user_id(), &input.subject)?;
    let message = queries::create_message(&tx, &conversation.id, ctx.user_id(), input.message.trim())?
        .ok_or_else(|| AppError::Internal("new conversation is not open".into()))?;
    tx.commit()?;

    tracing::info!(conversation_id = %conversation.id, user_id = %ctx.user_id(), "Support conversation opened");

    Ok((
        StatusCode::CREATED,
        Json(ConversationWithMessages {
            conversation,
            messages: vec![message],
        }),
    ))
}

/// Own conversations; admins see everyone's.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ConversationListQuery>,
) -> Result<Json<Paginated<SupportConversation>>> {
    let page = PaginationQuery {
        limit: query.limit,
        offset: query.offset,
    };
    let owner = (!ctx.is_admin()).then(|| ctx.user_id());
    let conn = state.db.get()?;
    let (items, total) =
        queries::list_conversations(&conn, owner, query.status, page.limit(), page.offset())?;
    Ok(Json(Paginated::from_query(items, total, &page)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ConversationWithMessages>> {
    let conversation = load_conversation(&state, &ctx.user, &id)?;
    let conn = state.db.get()?;
    let messages = queries::list_messages(&conn, &conversation.id)?;
    Ok(Json(ConversationWithMessages {
        conversation,
        messages,
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(input): Json<PostMessage>,
) -> Result<(StatusCode, Json<SupportMessage>)> {
    let conversation = load_conversation(&state, &ctx.user, &id)?;
    let message = post_message(&state, &ctx.user, &conversation, &input.body)?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn close_conversation(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SupportConversation>> {
    let conversation = load_conversation(&state, &ctx.user, &id)?;
    let conn = state.db.get()?;
    if queries::close_conversation(&conn, &conversation.id)? {
        let audit_conn = state.audit.get()?;
        AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
            .user(&ctx.user)
            .action(AuditAction::CloseConversation)
            .resource("conversation", &conversation.id)
            .save()?;
    }
    let conversation =
        queries::get_conversation(&conn, &id)?.or_not_found(msg::CONVERSATION_NOT_FOUND)?;
    Ok(Json(conversation))
}

// ============ WebSocket ============

#[derive(Serialize)]
struct SocketError<'a> {
    error: &'a str,
}

/// `GET /support/conversations/{id}/ws?token=`
///
/// Authentication happens before the upgrade so failures are plain HTTP
/// errors.
pub async fn conversation_ws(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ChatSocketQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let user = authenticate_token(&state, &query.token)?;
    let conversation = load_conversation(&state, &user, &id)?;
    Ok(ws.on_upgrade(move |socket| handle_conversation_ws(socket, state, user, conversation)))
}

async fn handle_conversation_ws(
    mut socket: WebSocket,
    state: AppState,
    user: User,
    conversation: SupportConversation,
) {
    // Subscribe before reading so nothing published meanwhile is missed
    let mut rx = state.chat.subscribe(&conversation.id);

    loop {
        tokio::select! {
            published = rx.recv() => match published {
                Ok(message) => {
                    if send_json(&mut socket, &message).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(conversation_id = %conversation.id, skipped, "Chat socket lagged");
                }
                Err(RecvError::Closed) => break,
            },

            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = serde_json::from_str::<PostMessage>(text.as_str())
                        .map_err(|_| AppError::BadRequest("Expected {\"body\": \"...\"}".into()))
                        .and_then(|input| post_message(&state, &user, &conversation, &input.body));
                    if let Err(e) = reply {
                        let text = e.public_message();
                        if send_json(&mut socket, &SocketError { error: &text }).await.is_err() {
                            break;
                        }
                        if matches!(e, AppError::Conflict(_)) {
                            let _ = socket
                                .send(Message::Close(Some(CloseFrame {
                                    code: 4009,
                                    reason: msg::CONVERSATION_CLOSED.into(),
                                })))
                                .await;
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conversation_id = %conversation.id, "Chat socket error: {}", e);
                    break;
                }
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}

/// Serialize `value` as JSON and send it as a text frame.
async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> std::result::Result<(), ()> {
    let json = serde_json::to_string(value).map_err(|_| ())?;
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}
