use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::db::AppState;
use crate::error::{AppError, Result, msg};
use crate::extractors::{Path, Query};
use crate::handlers::access::{load_lesson, require_lesson_access};
use crate::middleware::{authenticate, authenticate_token};
use crate::storage::ByteRange;

#[derive(Debug, Default, Deserialize)]
pub struct VideoQuery {
    /// `<video>` elements cannot send an Authorization header
    pub token: Option<String>,
}

/// Stream a lesson video, honouring single `Range: bytes=` requests.
pub async fn stream_lesson_video(
    State(state): State<AppState>,
    Path(lesson_id): Path<String>,
    Query(query): Query<VideoQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let user = match query.token.as_deref() {
        Some(token) => Some(authenticate_token(&state, token)?),
        None if headers.contains_key(header::AUTHORIZATION) => Some(authenticate(&state, &headers)?),
        None => None,
    };

    let (blob, content_type, total) = {
        let conn = state.db.get()?;
        let (course, lesson) = load_lesson(&conn, &lesson_id)?;
        require_lesson_access(&conn, user.as_ref(), &course, &lesson)?;
        let blob = lesson
            .video_blob
            .ok_or_else(|| AppError::NotFound(msg::VIDEO_NOT_FOUND.into()))?;
        (
            blob,
            lesson
                .video_content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            lesson.video_size.unwrap_or(0).max(0) as u64,
        )
    };

    let range = ByteRange::parse(
        headers.get(header::RANGE).and_then(|v| v.to_str().ok()),
        total,
    );

    if range == ByteRange::Unsatisfiable {
        return Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{}", total))],
        )
            .into_response());
    }

    let body = state.storage.read(&blob, range, total).await?;

    let mut response = Response::new(body);
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len(total)));
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, max-age=3600"));

    if let ByteRange::Partial(start, end) = range {
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        if let Ok(value) = HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, total)) {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }

    Ok(response)
}
