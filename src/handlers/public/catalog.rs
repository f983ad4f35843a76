use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{CertificateVerification, Course, CourseListQuery, CourseOutline};
use crate::pagination::{Paginated, PaginationQuery};

pub async fn list_courses(
    State(state): State<AppState>,
    Query(query): Query<CourseListQuery>,
) -> Result<Json<Paginated<Course>>> {
    let conn = state.db.get()?;
    let page = PaginationQuery {
        limit: query.limit,
        offset: query.offset,
    };
    let (courses, total) =
        queries::list_published_courses(&conn, &query, page.limit(), page.offset())?;
    Ok(Json(Paginated::from_query(courses, total, &page)))
}

/// Course page: the course with its module and lesson outline.
pub async fn get_course(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<CourseOutline>> {
    let conn = state.db.get()?;
    let course = queries::get_course_by_slug(&conn, &slug)?
        .filter(Course::is_available)
        .or_not_found(msg::COURSE_NOT_FOUND)?;
    Ok(Json(queries::get_course_outline(&conn, course)?))
}

/// Public certificate check. Unknown codes answer `{"valid": false}`.
pub async fn verify_certificate(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<CertificateVerification>> {
    let conn = state.db.get()?;
    let certificate = queries::get_certificate_by_code(&conn, &code.trim().to_uppercase())?;
    Ok(Json(certificate.into()))
}
