use rusqlite::{Connection, OptionalExtension, params};

use super::now;
use crate::crypto::generate_verification_code;
use crate::db::from_row::{
    CERTIFICATE_COLS, ENROLLMENT_COLS, LESSON_PROGRESS_COLS, query_all, query_one,
};
use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;
use crate::progress::{ProgressState, completion_percentage};

// ============ Enrollments ============

/// Grant access, re-activating a previously revoked enrollment.
pub fn grant_enrollment(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    purchase_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO enrollments (id, user_id, course_id, purchase_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id, course_id) DO UPDATE SET
            revoked_at = NULL,
            purchase_id = COALESCE(excluded.purchase_id, enrollments.purchase_id)",
        params![
            EntityType::Enrollment.gen_id(),
            user_id,
            course_id,
            purchase_id,
            now()
        ],
    )?;
    Ok(())
}

/// Revoke the enrollments a purchase granted. Returns how many were active.
pub fn revoke_enrollments_for_purchase(conn: &Connection, purchase_id: &str) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE enrollments SET revoked_at = ?1 WHERE purchase_id = ?2 AND revoked_at IS NULL",
        params![now(), purchase_id],
    )?)
}

pub fn get_active_enrollment(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
) -> Result<Option<Enrollment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM enrollments WHERE user_id = ?1 AND course_id = ?2 AND revoked_at IS NULL",
            ENROLLMENT_COLS
        ),
        &[&user_id, &course_id],
    )
}

pub fn has_active_enrollment(conn: &Connection, user_id: &str, course_id: &str) -> Result<bool> {
    Ok(get_active_enrollment(conn, user_id, course_id)?.is_some())
}

/// Active enrollees of a course, for targeted announcements.
pub fn list_active_enrollee_ids(conn: &Connection, course_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT e.user_id FROM enrollments e JOIN users u ON u.id = e.user_id
         WHERE e.course_id = ?1 AND e.revoked_at IS NULL AND u.deleted_at IS NULL",
    )?;
    let ids = stmt
        .query_map(params![course_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// The student dashboard: active enrollments with completion rollups.
pub fn list_enrolled_courses(conn: &Connection, user_id: &str) -> Result<Vec<EnrolledCourse>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.slug, c.title, c.thumbnail_url, e.created_at,
                (SELECT COUNT(*) FROM lesson_progress p
                   JOIN lessons l ON l.id = p.lesson_id
                  WHERE p.user_id = e.user_id AND p.course_id = c.id AND p.completed = 1),
                (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id)
         FROM enrollments e JOIN courses c ON c.id = e.course_id
         WHERE e.user_id = ?1 AND e.revoked_at IS NULL
         ORDER BY e.created_at DESC",
    )?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            let completed_lessons: i64 = row.get(5)?;
            let total_lessons: i64 = row.get(6)?;
            Ok(EnrolledCourse {
                course_id: row.get(0)?,
                slug: row.get(1)?,
                title: row.get(2)?,
                thumbnail_url: row.get(3)?,
                enrolled_at: row.get(4)?,
                completed_lessons,
                total_lessons,
                percentage: completion_percentage(completed_lessons, total_lessons),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ Progress ============

pub fn get_lesson_progress(
    conn: &Connection,
    user_id: &str,
    lesson_id: &str,
) -> Result<Option<LessonProgress>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM lesson_progress WHERE user_id = ?1 AND lesson_id = ?2",
            LESSON_PROGRESS_COLS
        ),
        &[&user_id, &lesson_id],
    )
}

/// Persist a merged progress state. `completed_at` is stamped the first time
/// the lesson completes and never moves afterwards.
pub fn save_lesson_progress(
    conn: &Connection,
    user_id: &str,
    lesson: &Lesson,
    state: ProgressState,
) -> Result<LessonProgress> {
    let now = now();
    let completed_at = state.completed.then_some(now);
    let progress = conn.query_row(
        &format!(
            "INSERT INTO lesson_progress (user_id, lesson_id, course_id, watched_seconds, completed, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                watched_seconds = MAX(lesson_progress.watched_seconds, excluded.watched_seconds),
                completed = MAX(lesson_progress.completed, excluded.completed),
                completed_at = COALESCE(lesson_progress.completed_at, excluded.completed_at),
                updated_at = excluded.updated_at
             RETURNING {}",
            LESSON_PROGRESS_COLS
        ),
        params![
            user_id,
            &lesson.id,
            &lesson.course_id,
            state.watched_seconds,
            state.completed as i64,
            completed_at,
            now
        ],
        <LessonProgress as crate::db::from_row::FromRow>::from_row,
    )?;
    Ok(progress)
}

pub fn get_course_progress(conn: &Connection, user_id: &str, course_id: &str) -> Result<CourseProgress> {
    let (total_lessons, completed_lessons, watched_seconds, last_completed_at): (
        i64,
        i64,
        i64,
        Option<i64>,
    ) = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM lessons WHERE course_id = ?2),
            COALESCE(SUM(CASE WHEN p.completed = 1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(p.watched_seconds), 0),
            MAX(p.completed_at)
         FROM lesson_progress p JOIN lessons l ON l.id = p.lesson_id
         WHERE p.user_id = ?1 AND p.course_id = ?2",
        params![user_id, course_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let percentage = completion_percentage(completed_lessons, total_lessons);
    let certificate_id: Option<String> = conn
        .query_row(
            "SELECT id FROM certificates WHERE user_id = ?1 AND course_id = ?2",
            params![user_id, course_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(CourseProgress {
        course_id: course_id.to_string(),
        completed_lessons,
        total_lessons,
        percentage,
        watched_seconds,
        completed_at: if percentage == 100 {
            last_completed_at
        } else {
            None
        },
        certificate_id,
    })
}

// ============ Certificates ============

/// Issue a certificate once per (user, course). Returns the certificate and
/// whether this call created it.
pub fn issue_certificate(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    student_name: &str,
    course_title: &str,
) -> Result<(Certificate, bool)> {
    if let Some(existing) = get_certificate_for_course(conn, user_id, course_id)? {
        return Ok((existing, false));
    }

    let id = EntityType::Certificate.gen_id();
    let now = now();
    let code = generate_verification_code();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO certificates (id, user_id, course_id, verification_code, student_name, course_title, issued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, user_id, course_id, &code, student_name, course_title, now],
    )?;

    if inserted == 0 {
        // Lost a race with a concurrent completion
        let existing = get_certificate_for_course(conn, user_id, course_id)?
            .ok_or_else(|| crate::error::AppError::Internal("certificate vanished".into()))?;
        return Ok((existing, false));
    }

    Ok((
        Certificate {
            id,
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            verification_code: code,
            student_name: student_name.to_string(),
            course_title: course_title.to_string(),
            issued_at: now,
        },
        true,
    ))
}

pub fn get_certificate_for_course(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
) -> Result<Option<Certificate>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM certificates WHERE user_id = ?1 AND course_id = ?2",
            CERTIFICATE_COLS
        ),
        &[&user_id, &course_id],
    )
}

pub fn get_certificate_by_id(conn: &Connection, id: &str) -> Result<Option<Certificate>> {
    query_one(
        conn,
        &format!("SELECT {} FROM certificates WHERE id = ?1", CERTIFICATE_COLS),
        &[&id],
    )
}

pub fn get_certificate_by_code(conn: &Connection, code: &str) -> Result<Option<Certificate>> {
    let code = code.trim().to_uppercase();
    query_one(
        conn,
        &format!(
            "SELECT {} FROM certificates WHERE verification_code = ?1",
            CERTIFICATE_COLS
        ),
        &[&code],
    )
}

pub fn list_certificates_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Certificate>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM certificates WHERE user_id = ?1 ORDER BY issued_at DESC",
            CERTIFICATE_COLS
        ),
        &[&user_id],
    )
}
