use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};
use serde::Serialize;

use super::certificates::verify_url;
use crate::db::{AppState, queries};
use crate::email::EmailMessage;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::fulfillment::notify_users;
use crate::handlers::access::{load_lesson, require_lesson_access};
use crate::middleware::AuthContext;
use crate::models::{
    AuditAction, Certificate, CourseProgress, EnrolledCourse, Lesson, LessonProgress,
    NewNotification, NotificationKind, ProgressResponse, UpdateProgress, User,
};
use crate::progress::{ProgressState, merge_progress};
use crate::util::AuditLogBuilder;

#[derive(Debug, Serialize)]
pub struct LessonView {
    #[serde(flatten)]
    pub lesson: Lesson,
    pub progress: Option<LessonProgress>,
}

pub async fn list_my_courses(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<EnrolledCourse>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_enrolled_courses(&conn, ctx.user_id())?))
}

pub async fn get_lesson(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((course_id, lesson_id)): Path<(String, String)>,
) -> Result<Json<LessonView>> {
    let conn = state.db.get()?;
    let (course, lesson) = load_lesson(&conn, &lesson_id)?;
    if course.id != course_id {
        return Err(AppError::NotFound(msg::LESSON_NOT_FOUND.into()));
    }
    require_lesson_access(&conn, Some(&ctx.user), &course, &lesson)?;

    let progress = queries::get_lesson_progress(&conn, ctx.user_id(), &lesson.id)?;
    Ok(Json(LessonView { lesson, progress }))
}

/// Record watch time for a lesson and issue the certificate once the
/// course reaches 100%.
pub async fn update_progress(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path((course_id, lesson_id)): Path<(String, String)>,
    Json(input): Json<UpdateProgress>,
) -> Result<Json<ProgressResponse>> {
    input.validate()?;
    let user = &ctx.user;

    let (lesson_progress, mut course_progress, issued) = {
        let conn = state.db.get()?;
        let (course, lesson) = load_lesson(&conn, &lesson_id)?;
        if course.id != course_id {
            return Err(AppError::NotFound(msg::LESSON_NOT_FOUND.into()));
        }
        if !queries::has_active_enrollment(&conn, &user.id, &course.id)? {
            return Err(AppError::Forbidden(msg::NOT_ENROLLED.into()));
        }

        let stored = queries::get_lesson_progress(&conn, &user.id, &lesson.id)?.map(|p| {
            ProgressState {
                watched_seconds: p.watched_seconds,
                completed: p.completed,
            }
        });
        let merged = merge_progress(
            stored,
            input.watched_seconds,
            input.completed,
            lesson.duration_seconds,
        );
        let lesson_progress = queries::save_lesson_progress(&conn, &user.id, &lesson, merged)?;
        let course_progress = queries::get_course_progress(&conn, &user.id, &course.id)?;

        let issued = if course_progress.percentage == 100 {
            let (certificate, created) =
                queries::issue_certificate(&conn, &user.id, &course.id, &user.name, &course.title)?;
            created.then_some(certificate)
        } else {
            None
        };
        (lesson_progress, course_progress, issued)
    };

    if let Some(certificate) = issued {
        course_progress.certificate_id = Some(certificate.id.clone());
        announce_certificate(&state, user, &certificate, &headers);
    }

    Ok(Json(ProgressResponse {
        lesson: lesson_progress,
        course: course_progress,
    }))
}

/// Notification, email and audit entry for a newly issued certificate.
fn announce_certificate(state: &AppState, user: &User, certificate: &Certificate, headers: &HeaderMap) {
    let verify = verify_url(&state.base_url, &certificate.verification_code);

    let notification = NewNotification {
        kind: NotificationKind::CertificateIssued,
        title: "Certificate issued".to_string(),
        body: format!(
            "Congratulations! You completed {}.",
            certificate.course_title
        ),
        link: Some(format!("/certificates/{}/pdf", certificate.id)),
    };
    if let Err(e) = notify_users(state, std::slice::from_ref(&user.id), &notification) {
        tracing::warn!(certificate_id = %certificate.id, "Failed to store certificate notification: {}", e);
    }

    state.email_service.send_in_background(EmailMessage::certificate_issued(
        &user.email,
        &certificate.course_title,
        &verify,
    ));

    match state.audit.get() {
        Ok(audit_conn) => {
            if let Err(e) = AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, headers)
                .user(user)
                .action(AuditAction::IssueCertificate)
                .resource("certificate", &certificate.id)
                .details(&serde_json::json!({ "course_id": certificate.course_id }))
                .save()
            {
                tracing::warn!("Failed to write certificate audit log: {}", e);
            }
        }
        Err(e) => tracing::warn!("Audit DB connection error: {}", e),
    }

    tracing::info!(
        certificate_id = %certificate.id,
        user_id = %user.id,
        course_id = %certificate.course_id,
        "Certificate issued"
    );
}

pub async fn get_progress(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(course_id): Path<String>,
) -> Result<Json<CourseProgress>> {
    let conn = state.db.get()?;
    queries::get_course_by_id(&conn, &course_id)?.or_not_found(msg::COURSE_NOT_FOUND)?;
    if !ctx.is_admin() && !queries::has_active_enrollment(&conn, ctx.user_id(), &course_id)? {
        return Err(AppError::Forbidden(msg::NOT_ENROLLED.into()));
    }
    Ok(Json(queries::get_course_progress(&conn, ctx.user_id(), &course_id)?))
}
