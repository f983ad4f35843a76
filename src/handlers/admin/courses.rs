use axum::{
    body::Bytes,
    extract::{Extension, State},
    http::{HeaderMap, StatusCode, header},
};
use rusqlite::Connection;
use serde::Serialize;

use super::audit;
use crate::db::queries::{self, CourseDeletion};
use crate::db::AppState;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::handlers::access::load_lesson;
use crate::middleware::AuthContext;
use crate::models::{
    AuditAction, Course, CourseModule, CourseOutline, CreateCourse, CreateLesson, CreateModule,
    Lesson, UpdateCourse, UpdateLesson, UpdateModule,
};
use crate::pagination::{Paginated, PaginationQuery};

fn load_owned_course(conn: &Connection, ctx: &AuthContext, id: &str) -> Result<Course> {
    let course = queries::get_course_by_id(conn, id)?.or_not_found(msg::COURSE_NOT_FOUND)?;
    ctx.require_course_owner(&course)?;
    Ok(course)
}

fn load_owned_module(conn: &Connection, ctx: &AuthContext, id: &str) -> Result<(Course, CourseModule)> {
    let module = queries::get_module_by_id(conn, id)?.or_not_found(msg::MODULE_NOT_FOUND)?;
    let course = load_owned_course(conn, ctx, &module.course_id)?;
    Ok((course, module))
}

fn load_owned_lesson(conn: &Connection, ctx: &AuthContext, id: &str) -> Result<(Course, Lesson)> {
    let (course, lesson) = load_lesson(conn, id)?;
    ctx.require_course_owner(&course)?;
    Ok((course, lesson))
}

// ============ Courses ============

/// Instructors see their own courses, admins every course.
pub async fn list_courses(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Paginated<Course>>> {
    let conn = state.db.get()?;
    let instructor = (!ctx.is_admin()).then(|| ctx.user_id());
    let (courses, total) =
        queries::list_courses_for_staff(&conn, instructor, query.limit(), query.offset())?;
    Ok(Json(Paginated::from_query(courses, total, &query)))
}

pub async fn create_course(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(input): Json<CreateCourse>,
) -> Result<(StatusCode, Json<Course>)> {
    input.validate()?;
    let conn = state.db.get()?;

    let instructor_id = match input.instructor_id.as_deref() {
        Some(id) if id != ctx.user_id() => {
            ctx.require_admin()?;
            let instructor = queries::get_user_by_id(&conn, id)?.or_not_found(msg::USER_NOT_FOUND)?;
            if !instructor.role.is_staff() {
                return Err(AppError::BadRequest(
                    "Courses can only be assigned to instructors or admins".into(),
                ));
            }
            instructor.id
        }
        _ => ctx.user_id().to_string(),
    };

    if queries::slug_exists(&conn, &input.slug)? {
        return Err(AppError::Conflict(format!("Slug '{}' is already taken", input.slug)));
    }

    let course = queries::create_course(&conn, &instructor_id, &input, &state.default_currency)?;

    audit(&state, &headers, &ctx, AuditAction::CreateCourse, "course", &course.id, Some(serde_json::json!({
        "slug": course.slug,
        "title": course.title,
        "price_cents": course.price_cents,
        "currency": course.currency,
    })))?;

    Ok((StatusCode::CREATED, Json(course)))
}

/// Full outline including unpublished state, for the course editor.
pub async fn get_course(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<CourseOutline>> {
    let conn = state.db.get()?;
    let course = load_owned_course(&conn, &ctx, &id)?;
    Ok(Json(queries::get_course_outline(&conn, course)?))
}

pub async fn update_course(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<UpdateCourse>,
) -> Result<Json<Course>> {
    input.validate()?;
    let conn = state.db.get()?;
    let existing = load_owned_course(&conn, &ctx, &id)?;

    if let Some(ref slug) = input.slug
        && slug != &existing.slug
        && queries::slug_exists(&conn, slug)?
    {
        return Err(AppError::Conflict(format!("Slug '{}' is already taken", slug)));
    }

    let course = queries::update_course(&conn, &id, &input)?.or_not_found(msg::COURSE_NOT_FOUND)?;

    audit(&state, &headers, &ctx, AuditAction::UpdateCourse, "course", &id, Some(serde_json::json!({
        "slug": input.slug,
        "title": input.title,
        "price_cents": input.price_cents,
        "currency": input.currency,
    })))?;

    Ok(Json(course))
}

#[derive(Debug, Serialize)]
pub struct DeleteCourseResponse {
    /// `false` when purchases reference the course and it was only hidden
    pub hard_deleted: bool,
}

pub async fn delete_course(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeleteCourseResponse>> {
    let conn = state.db.get()?;
    load_owned_course(&conn, &ctx, &id)?;
    let deletion = queries::delete_course(&conn, &id)?;
    let hard_deleted = deletion == CourseDeletion::Hard;

    audit(&state, &headers, &ctx, AuditAction::DeleteCourse, "course", &id, Some(serde_json::json!({
        "hard_deleted": hard_deleted,
    })))?;

    Ok(Json(DeleteCourseResponse { hard_deleted }))
}

pub async fn publish_course(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Course>> {
    let conn = state.db.get()?;
    load_owned_course(&conn, &ctx, &id)?;
    if queries::count_lessons_for_course(&conn, &id)? == 0 {
        return Err(AppError::BadRequest(
            "A course needs at least one lesson before it can be published".into(),
        ));
    }
    let course =
        queries::set_course_published(&conn, &id, true)?.or_not_found(msg::COURSE_NOT_FOUND)?;
    audit(&state, &headers, &ctx, AuditAction::PublishCourse, "course", &id, None)?;
    Ok(Json(course))
}

pub async fn unpublish_course(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Course>> {
    let conn = state.db.get()?;
    load_owned_course(&conn, &ctx, &id)?;
    let course =
        queries::set_course_published(&conn, &id, false)?.or_not_found(msg::COURSE_NOT_FOUND)?;
    audit(&state, &headers, &ctx, AuditAction::UnpublishCourse, "course", &id, None)?;
    Ok(Json(course))
}

// ============ Modules ============

pub async fn create_module(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(course_id): Path<String>,
    Json(input): Json<CreateModule>,
) -> Result<(StatusCode, Json<CourseModule>)> {
    input.validate()?;
    let conn = state.db.get()?;
    load_owned_course(&conn, &ctx, &course_id)?;
    let module = queries::create_module(&conn, &course_id, &input)?;
    audit(&state, &headers, &ctx, AuditAction::CreateModule, "module", &module.id, Some(serde_json::json!({
        "course_id": course_id,
        "title": module.title,
    })))?;
    Ok((StatusCode::CREATED, Json(module)))
}

pub async fn update_module(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<UpdateModule>,
) -> Result<Json<CourseModule>> {
    input.validate()?;
    let conn = state.db.get()?;
    load_owned_module(&conn, &ctx, &id)?;
    let module = queries::update_module(&conn, &id, &input)?.or_not_found(msg::MODULE_NOT_FOUND)?;
    audit(&state, &headers, &ctx, AuditAction::UpdateModule, "module", &id, None)?;
    Ok(Json(module))
}

/// Deletes the module and its lessons.
pub async fn delete_module(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let blobs = {
        let conn = state.db.get()?;
        let (course, _) = load_owned_module(&conn, &ctx, &id)?;
        let blobs: Vec<String> = queries::list_lessons_for_course(&conn, &course.id)?
            .into_iter()
            .filter(|l| l.module_id == id)
            .filter_map(|l| l.video_blob)
            .collect();
        queries::delete_module(&conn, &id)?;
        blobs
    };
    for blob in blobs {
        if let Err(e) = state.storage.delete(&blob).await {
            tracing::warn!(blob = %blob, "Failed to delete lesson video: {}", e);
        }
    }
    audit(&state, &headers, &ctx, AuditAction::DeleteModule, "module", &id, None)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Lessons ============

pub async fn create_lesson(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(module_id): Path<String>,
    Json(input): Json<CreateLesson>,
) -> Result<(StatusCode, Json<Lesson>)> {
    input.validate()?;
    let conn = state.db.get()?;
    let (_, module) = load_owned_module(&conn, &ctx, &module_id)?;
    let lesson = queries::create_lesson(&conn, &module, &input)?;
    audit(&state, &headers, &ctx, AuditAction::CreateLesson, "lesson", &lesson.id, Some(serde_json::json!({
        "course_id": lesson.course_id,
        "module_id": lesson.module_id,
        "title": lesson.title,
    })))?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

pub async fn update_lesson(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<UpdateLesson>,
) -> Result<Json<Lesson>> {
    input.validate()?;
    let conn = state.db.get()?;
    let (course, _) = load_owned_lesson(&conn, &ctx, &id)?;

    if let Some(ref module_id) = input.module_id {
        let target = queries::get_module_by_id(&conn, module_id)?.or_not_found(msg::MODULE_NOT_FOUND)?;
        if target.course_id != course.id {
            return Err(AppError::BadRequest(
                "Lessons can only move between modules of the same course".into(),
            ));
        }
    }

    let lesson = queries::update_lesson(&conn, &id, &input)?.or_not_found(msg::LESSON_NOT_FOUND)?;
    audit(&state, &headers, &ctx, AuditAction::UpdateLesson, "lesson", &id, None)?;
    Ok(Json(lesson))
}

pub async fn delete_lesson(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let blob = {
        let conn = state.db.get()?;
        let (_, lesson) = load_owned_lesson(&conn, &ctx, &id)?;
        queries::delete_lesson(&conn, &id)?;
        lesson.video_blob
    };
    if let Some(blob) = blob
        && let Err(e) = state.storage.delete(&blob).await
    {
        tracing::warn!(blob = %blob, "Failed to delete lesson video: {}", e);
    }
    audit(&state, &headers, &ctx, AuditAction::DeleteLesson, "lesson", &id, None)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Videos ============

/// Store the raw request body as the lesson's video, replacing any previous one.
pub async fn upload_video(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Lesson>> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Video body is empty".into()));
    }
    {
        let conn = state.db.get()?;
        load_owned_lesson(&conn, &ctx, &id)?;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let size = body.len() as i64;
    let blob = format!("lessons/{}/{}", id, uuid::Uuid::new_v4());

    state.storage.put(&blob, body, &content_type).await?;

    let (previous, lesson) = {
        let conn = state.db.get()?;
        let previous = queries::set_lesson_video(&conn, &id, Some((&blob, &content_type, size)))?;
        let lesson = queries::get_lesson_by_id(&conn, &id)?.or_not_found(msg::LESSON_NOT_FOUND)?;
        (previous, lesson)
    };
    if let Some(previous) = previous
        && let Err(e) = state.storage.delete(&previous).await
    {
        tracing::warn!(blob = %previous, "Failed to delete replaced video: {}", e);
    }

    tracing::info!(lesson_id = %id, blob = %blob, size, backend = state.storage.backend_name(), "Lesson video stored");
    audit(&state, &headers, &ctx, AuditAction::UploadVideo, "lesson", &id, Some(serde_json::json!({
        "blob": blob,
        "content_type": content_type,
        "size": size,
    })))?;

    Ok(Json(lesson))
}

pub async fn delete_video(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let previous = {
        let conn = state.db.get()?;
        let (_, lesson) = load_owned_lesson(&conn, &ctx, &id)?;
        if lesson.video_blob.is_none() {
            return Err(AppError::NotFound(msg::VIDEO_NOT_FOUND.into()));
        }
        queries::set_lesson_video(&conn, &id, None)?
    };
    if let Some(previous) = previous {
        state.storage.delete(&previous).await?;
    }
    audit(&state, &headers, &ctx, AuditAction::DeleteVideo, "lesson", &id, None)?;
    Ok(StatusCode::NO_CONTENT)
}

