use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::progress::MAX_LESSON_SECONDS;

/// Access grant for one course. A revoked enrollment (refund) keeps its row so
/// a later purchase re-activates it instead of inserting a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub purchase_id: Option<String>,
    pub created_at: i64,
    pub revoked_at: Option<i64>,
}

/// Enrollment joined with its course for the student dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct EnrolledCourse {
    pub course_id: String,
    pub slug: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub enrolled_at: i64,
    pub completed_lessons: i64,
    pub total_lessons: i64,
    pub percentage: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonProgress {
    pub user_id: String,
    pub lesson_id: String,
    pub course_id: String,
    pub watched_seconds: i64,
    pub completed: bool,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

/// `POST /learn/courses/{course_id}/lessons/{lesson_id}/progress`
#[derive(Debug, Deserialize)]
pub struct UpdateProgress {
    #[serde(default)]
    pub watched_seconds: i64,
    /// Explicitly mark the lesson done (e.g. text-only lessons)
    #[serde(default)]
    pub completed: bool,
}

impl UpdateProgress {
    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_LESSON_SECONDS).contains(&self.watched_seconds) {
            return Err(AppError::BadRequest(format!(
                "watched_seconds must be between 0 and {}",
                MAX_LESSON_SECONDS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseProgress {
    pub course_id: String,
    pub completed_lessons: i64,
    pub total_lessons: i64,
    pub percentage: i64,
    pub watched_seconds: i64,
    /// When the last lesson was completed, if the course is done
    pub completed_at: Option<i64>,
    pub certificate_id: Option<String>,
}

/// Returned by the progress endpoint: the lesson row plus course rollup.
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub lesson: LessonProgress,
    pub course: CourseProgress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub verification_code: String,
    /// Snapshotted at issue time so renames do not alter issued certificates
    pub student_name: String,
    pub course_title: String,
    pub issued_at: i64,
}

/// Public answer for `GET /certificates/verify/{code}`.
#[derive(Debug, Serialize)]
pub struct CertificateVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
}

impl From<Option<Certificate>> for CertificateVerification {
    fn from(cert: Option<Certificate>) -> Self {
        match cert {
            Some(c) => Self {
                valid: true,
                student_name: Some(c.student_name),
                course_title: Some(c.course_title),
                issued_at: Some(c.issued_at),
            },
            None => Self {
                valid: false,
                student_name: None,
                course_title: None,
                issued_at: None,
            },
        }
    }
}
