use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{Course, Lesson, User};

/// Load a lesson together with its course.
pub fn load_lesson(conn: &Connection, lesson_id: &str) -> Result<(Course, Lesson)> {
    let lesson = queries::get_lesson_by_id(conn, lesson_id)?.or_not_found(msg::LESSON_NOT_FOUND)?;
    let course =
        queries::get_course_by_id(conn, &lesson.course_id)?.or_not_found(msg::LESSON_NOT_FOUND)?;
    Ok((course, lesson))
}

/// Lesson content is visible to active enrollees and the course's staff.
/// Preview lessons of a published course are visible to everyone.
pub fn require_lesson_access(
    conn: &Connection,
    user: Option<&User>,
    course: &Course,
    lesson: &Lesson,
) -> Result<()> {
    if let Some(user) = user {
        if user.role.is_admin() || (user.role.is_staff() && course.instructor_id == user.id) {
            return Ok(());
        }
        if queries::has_active_enrollment(conn, &user.id, &course.id)? {
            return Ok(());
        }
    }
    if lesson.is_preview && course.is_available() {
        return Ok(());
    }
    match user {
        Some(_) => Err(AppError::Forbidden(msg::NOT_ENROLLED.into())),
        None => Err(AppError::Unauthorized),
    }
}
