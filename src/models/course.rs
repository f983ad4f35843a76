use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result, msg};
use crate::progress::MAX_LESSON_SECONDS;

/// Distinguishes "field absent" (`None`) from "field set to null" (`Some(None)`)
/// in PATCH-style updates.
pub(crate) fn deserialize_optional_nullable<'de, D, T>(
    deserializer: D,
) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value: Option<T> = Option::deserialize(deserializer)?;
    Ok(Some(value))
}

/// ISO 4217 alphabetic code, stored lowercase.
pub fn validate_currency(currency: &str) -> Result<()> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::BadRequest(format!(
            "Invalid currency code: {}",
            currency
        )));
    }
    Ok(())
}

/// Slugs are lowercase ASCII words joined by single hyphens.
pub fn validate_slug(slug: &str) -> Result<()> {
    let valid = !slug.is_empty()
        && slug.len() <= 100
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(AppError::BadRequest(
            "Slug must be lowercase letters, digits and single hyphens".into(),
        ));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(AppError::BadRequest(msg::TITLE_EMPTY.into()));
    }
    if title.len() > 200 {
        return Err(AppError::BadRequest("Title must be at most 200 characters".into()));
    }
    Ok(())
}

fn validate_duration(seconds: i64) -> Result<()> {
    if !(0..=MAX_LESSON_SECONDS).contains(&seconds) {
        return Err(AppError::BadRequest(format!(
            "duration_seconds must be between 0 and {}",
            MAX_LESSON_SECONDS
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CourseLevel {
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub description: String,
    pub instructor_id: String,
    pub price_cents: i64,
    pub currency: String,
    pub level: CourseLevel,
    pub thumbnail_url: Option<String>,
    pub published: bool,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl Course {
    /// Visible in the catalog and purchasable.
    pub fn is_available(&self) -> bool {
        self.published && self.deleted_at.is_none()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCourse {
    pub slug: String,
    pub title: String,
    pub subtitle: Option<String>,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    pub currency: Option<String>,
    pub level: Option<CourseLevel>,
    pub thumbnail_url: Option<String>,
    /// Admins may create a course on behalf of an instructor
    pub instructor_id: Option<String>,
}

impl CreateCourse {
    pub fn validate(&self) -> Result<()> {
        validate_slug(&self.slug)?;
        validate_title(&self.title)?;
        if self.price_cents < 0 {
            return Err(AppError::BadRequest("price_cents cannot be negative".into()));
        }
        if let Some(ref currency) = self.currency {
            validate_currency(currency)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCourse {
    pub slug: Option<String>,
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub subtitle: Option<Option<String>>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub level: Option<CourseLevel>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub thumbnail_url: Option<Option<String>>,
}

impl UpdateCourse {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref slug) = self.slug {
            validate_slug(slug)?;
        }
        if let Some(ref title) = self.title {
            validate_title(title)?;
        }
        if let Some(price) = self.price_cents
            && price < 0
        {
            return Err(AppError::BadRequest("price_cents cannot be negative".into()));
        }
        if let Some(ref currency) = self.currency {
            validate_currency(currency)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseModule {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub position: i64,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateModule {
    pub title: String,
    /// Appended to the end when omitted
    pub position: Option<i64>,
}

impl CreateModule {
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateModule {
    pub title: Option<String>,
    pub position: Option<i64>,
}

impl UpdateModule {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref title) = self.title {
            validate_title(title)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub module_id: String,
    pub course_id: String,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing)]
    pub video_blob: Option<String>,
    pub video_content_type: Option<String>,
    pub video_size: Option<i64>,
    pub duration_seconds: i64,
    pub is_preview: bool,
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Lesson {
    pub fn summary(&self) -> LessonSummary {
        LessonSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            duration_seconds: self.duration_seconds,
            is_preview: self.is_preview,
            position: self.position,
            has_video: self.video_blob.is_some(),
        }
    }
}

/// Lesson as shown in a public course outline (no content).
#[derive(Debug, Clone, Serialize)]
pub struct LessonSummary {
    pub id: String,
    pub title: String,
    pub duration_seconds: i64,
    pub is_preview: bool,
    pub position: i64,
    pub has_video: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateLesson {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub duration_seconds: i64,
    #[serde(default)]
    pub is_preview: bool,
    pub position: Option<i64>,
}

impl CreateLesson {
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_duration(self.duration_seconds)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateLesson {
    pub title: Option<String>,
    pub content: Option<String>,
    pub duration_seconds: Option<i64>,
    pub is_preview: Option<bool>,
    pub position: Option<i64>,
    /// Move the lesson to another module of the same course
    pub module_id: Option<String>,
}

impl UpdateLesson {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref title) = self.title {
            validate_title(title)?;
        }
        if let Some(d) = self.duration_seconds {
            validate_duration(d)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct ModuleOutline {
    #[serde(flatten)]
    pub module: CourseModule,
    pub lessons: Vec<LessonSummary>,
}

#[derive(Debug, Serialize)]
pub struct CourseOutline {
    #[serde(flatten)]
    pub course: Course,
    pub instructor_name: String,
    pub modules: Vec<ModuleOutline>,
    pub total_lessons: i64,
    pub total_duration_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct CourseListQuery {
    /// Case-insensitive title search
    pub q: Option<String>,
    pub level: Option<CourseLevel>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
