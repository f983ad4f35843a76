use rusqlite::{Connection, params};

use super::{Filter, UpdateBuilder, now};
use crate::db::from_row::{COURSE_COLS, LESSON_COLS, MODULE_COLS, query_all, query_one};
use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

// ============ Courses ============

pub fn create_course(
    conn: &Connection,
    instructor_id: &str,
    input: &CreateCourse,
    default_currency: &str,
) -> Result<Course> {
    let id = EntityType::Course.gen_id();
    let now = now();
    let currency = input
        .currency
        .as_deref()
        .unwrap_or(default_currency)
        .to_lowercase();
    let level = input.level.unwrap_or(CourseLevel::Beginner);

    conn.execute(
        "INSERT INTO courses (id, slug, title, subtitle, description, instructor_id, price_cents, currency, level, thumbnail_url, published, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12)",
        params![
            &id,
            &input.slug,
            input.title.trim(),
            &input.subtitle,
            &input.description,
            instructor_id,
            input.price_cents,
            &currency,
            level.as_ref(),
            &input.thumbnail_url,
            now,
            now
        ],
    )?;

    Ok(Course {
        id,
        slug: input.slug.clone(),
        title: input.title.trim().to_string(),
        subtitle: input.subtitle.clone(),
        description: input.description.clone(),
        instructor_id: instructor_id.to_string(),
        price_cents: input.price_cents,
        currency,
        level,
        thumbnail_url: input.thumbnail_url.clone(),
        published: false,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

pub fn get_course_by_id(conn: &Connection, id: &str) -> Result<Option<Course>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM courses WHERE id = ?1 AND deleted_at IS NULL",
            COURSE_COLS
        ),
        &[&id],
    )
}

pub fn get_course_by_slug(conn: &Connection, slug: &str) -> Result<Option<Course>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM courses WHERE slug = ?1 AND deleted_at IS NULL",
            COURSE_COLS
        ),
        &[&slug],
    )
}

pub fn slug_exists(conn: &Connection, slug: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM courses WHERE slug = ?1)",
        params![slug],
        |row| row.get(0),
    )?)
}

/// Catalog listing: published, non-deleted courses.
pub fn list_published_courses(
    conn: &Connection,
    query: &CourseListQuery,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Course>, i64)> {
    let mut filter = Filter::default();
    filter.raw("published = 1");
    filter.raw("deleted_at IS NULL");
    filter.push_opt(
        "LOWER(title) LIKE ? ESCAPE '\\'",
        query
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", escape_like(&q.to_lowercase()))),
    );
    filter.push_opt("level = ?", query.level.map(|l| l.as_ref().to_string()));
    filter.paginate(conn, COURSE_COLS, "courses", "created_at DESC", limit, offset)
}

/// Staff listing; `instructor_id = None` lists every course (admins).
pub fn list_courses_for_staff(
    conn: &Connection,
    instructor_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Course>, i64)> {
    let mut filter = Filter::default();
    filter.raw("deleted_at IS NULL");
    filter.push_opt("instructor_id = ?", instructor_id.map(String::from));
    filter.paginate(conn, COURSE_COLS, "courses", "created_at DESC", limit, offset)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

pub fn update_course(conn: &Connection, id: &str, input: &UpdateCourse) -> Result<Option<Course>> {
    let updated = UpdateBuilder::new("courses", id)
        .with_updated_at()
        .live_only()
        .set_opt("slug", input.slug.clone())
        .set_opt("title", input.title.as_ref().map(|t| t.trim().to_string()))
        .set_opt("description", input.description.clone())
        .set_opt("price_cents", input.price_cents)
        .set_opt("currency", input.currency.as_ref().map(|c| c.to_lowercase()))
        .set_opt("level", input.level.map(|l| l.as_ref().to_string()));
    let updated = match &input.subtitle {
        Some(subtitle) => updated.set_nullable("subtitle", subtitle.clone()),
        None => updated,
    };
    let updated = match &input.thumbnail_url {
        Some(url) => updated.set_nullable("thumbnail_url", url.clone()),
        None => updated,
    };
    match updated.execute_returning(conn, COURSE_COLS)? {
        Some(course) => Ok(Some(course)),
        None => get_course_by_id(conn, id),
    }
}

pub fn set_course_published(conn: &Connection, id: &str, published: bool) -> Result<Option<Course>> {
    UpdateBuilder::new("courses", id)
        .with_updated_at()
        .live_only()
        .set("published", published as i64)
        .execute_returning(conn, COURSE_COLS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseDeletion {
    /// Nobody ever bought it; rows are gone
    Hard,
    /// Purchases or enrollments reference it; hidden and kept for history
    Soft,
}

/// Delete a course, keeping the row when purchases or enrollments reference it.
pub fn delete_course(conn: &Connection, id: &str) -> Result<CourseDeletion> {
    let referenced: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM enrollments WHERE course_id = ?1)
             OR EXISTS(SELECT 1 FROM purchase_items WHERE course_id = ?1)",
        params![id],
        |row| row.get(0),
    )?;

    if referenced {
        let now = now();
        conn.execute(
            "UPDATE courses SET published = 0, deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        conn.execute("DELETE FROM cart_items WHERE course_id = ?1", params![id])?;
        Ok(CourseDeletion::Soft)
    } else {
        conn.execute("DELETE FROM courses WHERE id = ?1", params![id])?;
        Ok(CourseDeletion::Hard)
    }
}

// ============ Modules ============

fn next_position(conn: &Connection, sql: &str, parent_id: &str) -> Result<i64> {
    let max: Option<i64> = conn.query_row(sql, params![parent_id], |row| row.get(0))?;
    Ok(max.map(|m| m + 1).unwrap_or(0))
}

pub fn create_module(conn: &Connection, course_id: &str, input: &CreateModule) -> Result<CourseModule> {
    let id = EntityType::Module.gen_id();
    let now = now();
    let position = match input.position {
        Some(p) => p,
        None => next_position(
            conn,
            "SELECT MAX(position) FROM course_modules WHERE course_id = ?1",
            course_id,
        )?,
    };

    conn.execute(
        "INSERT INTO course_modules (id, course_id, title, position, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, course_id, input.title.trim(), position, now],
    )?;

    Ok(CourseModule {
        id,
        course_id: course_id.to_string(),
        title: input.title.trim().to_string(),
        position,
        created_at: now,
    })
}

pub fn get_module_by_id(conn: &Connection, id: &str) -> Result<Option<CourseModule>> {
    query_one(
        conn,
        &format!("SELECT {} FROM course_modules WHERE id = ?1", MODULE_COLS),
        &[&id],
    )
}

pub fn list_modules_for_course(conn: &Connection, course_id: &str) -> Result<Vec<CourseModule>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM course_modules WHERE course_id = ?1 ORDER BY position, created_at",
            MODULE_COLS
        ),
        &[&course_id],
    )
}

pub fn update_module(conn: &Connection, id: &str, input: &UpdateModule) -> Result<Option<CourseModule>> {
    let updated = UpdateBuilder::new("course_modules", id)
        .set_opt("title", input.title.as_ref().map(|t| t.trim().to_string()))
        .set_opt("position", input.position)
        .execute_returning(conn, MODULE_COLS)?;
    match updated {
        Some(module) => Ok(Some(module)),
        None => get_module_by_id(conn, id),
    }
}

pub fn delete_module(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM course_modules WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

// ============ Lessons ============

pub fn create_lesson(conn: &Connection, module: &CourseModule, input: &CreateLesson) -> Result<Lesson> {
    let id = EntityType::Lesson.gen_id();
    let now = now();
    let position = match input.position {
        Some(p) => p,
        None => next_position(
            conn,
            "SELECT MAX(position) FROM lessons WHERE module_id = ?1",
            &module.id,
        )?,
    };

    conn.execute(
        "INSERT INTO lessons (id, module_id, course_id, title, content, duration_seconds, is_preview, position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            &module.id,
            &module.course_id,
            input.title.trim(),
            &input.content,
            input.duration_seconds,
            input.is_preview as i64,
            position,
            now,
            now
        ],
    )?;

    Ok(Lesson {
        id,
        module_id: module.id.clone(),
        course_id: module.course_id.clone(),
        title: input.title.trim().to_string(),
        content: input.content.clone(),
        video_blob: None,
        video_content_type: None,
        video_size: None,
        duration_seconds: input.duration_seconds,
        is_preview: input.is_preview,
        position,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_lesson_by_id(conn: &Connection, id: &str) -> Result<Option<Lesson>> {
    query_one(
        conn,
        &format!("SELECT {} FROM lessons WHERE id = ?1", LESSON_COLS),
        &[&id],
    )
}

/// Lessons in outline order: module position, then lesson position.
pub fn list_lessons_for_course(conn: &Connection, course_id: &str) -> Result<Vec<Lesson>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM lessons WHERE course_id = ?1
             ORDER BY (SELECT position FROM course_modules m WHERE m.id = lessons.module_id), position, created_at",
            LESSON_COLS
        ),
        &[&course_id],
    )
}

pub fn count_lessons_for_course(conn: &Connection, course_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM lessons WHERE course_id = ?1",
        params![course_id],
        |row| row.get(0),
    )?)
}

/// `module_id`, when set, must already be verified to belong to the same course.
pub fn update_lesson(conn: &Connection, id: &str, input: &UpdateLesson) -> Result<Option<Lesson>> {
    let updated = UpdateBuilder::new("lessons", id)
        .with_updated_at()
        .set_opt("title", input.title.as_ref().map(|t| t.trim().to_string()))
        .set_opt("content", input.content.clone())
        .set_opt("duration_seconds", input.duration_seconds)
        .set_opt("is_preview", input.is_preview.map(|p| p as i64))
        .set_opt("position", input.position)
        .set_opt("module_id", input.module_id.clone())
        .execute_returning(conn, LESSON_COLS)?;
    match updated {
        Some(lesson) => Ok(Some(lesson)),
        None => get_lesson_by_id(conn, id),
    }
}

pub fn delete_lesson(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM lessons WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// Point a lesson at a stored video blob, returning the blob it replaced.
pub fn set_lesson_video(
    conn: &Connection,
    id: &str,
    blob: Option<(&str, &str, i64)>,
) -> Result<Option<String>> {
    let previous: Option<String> = conn.query_row(
        "SELECT video_blob FROM lessons WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    let (name, content_type, size) = match blob {
        Some((n, ct, s)) => (Some(n), Some(ct), Some(s)),
        None => (None, None, None),
    };
    UpdateBuilder::new("lessons", id)
        .with_updated_at()
        .set_nullable("video_blob", name.map(String::from))
        .set_nullable("video_content_type", content_type.map(String::from))
        .set_nullable("video_size", size)
        .execute(conn)?;
    Ok(previous)
}

// ============ Outline ============

pub fn get_course_outline(conn: &Connection, course: Course) -> Result<CourseOutline> {
    let instructor_name: String = conn
        .query_row(
            "SELECT name FROM users WHERE id = ?1",
            params![&course.instructor_id],
            |row| row.get(0),
        )
        .unwrap_or_default();

    let lessons = list_lessons_for_course(conn, &course.id)?;
    let total_lessons = lessons.len() as i64;
    let total_duration_seconds = lessons.iter().map(|l| l.duration_seconds).sum();

    let modules = list_modules_for_course(conn, &course.id)?
        .into_iter()
        .map(|module| {
            let lessons = lessons
                .iter()
                .filter(|l| l.module_id == module.id)
                .map(Lesson::summary)
                .collect();
            ModuleOutline { module, lessons }
        })
        .collect();

    Ok(CourseOutline {
        course,
        instructor_name,
        modules,
        total_lessons,
        total_duration_seconds,
    })
}
