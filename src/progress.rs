//! Lesson progress merging and course completion math.

/// Share of a lesson's duration that counts as watched-to-completion.
pub const AUTO_COMPLETE_PERCENT: i64 = 90;

/// Longest lesson duration or watch report accepted (one week).
pub const MAX_LESSON_SECONDS: i64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    pub watched_seconds: i64,
    pub completed: bool,
}

/// Merge a client report into the stored state.
///
/// Watched time never decreases and is capped at the lesson duration when
/// one is known (`duration_seconds > 0`). Completion is sticky.
pub fn merge_progress(
    stored: Option<ProgressState>,
    reported_seconds: i64,
    mark_completed: bool,
    duration_seconds: i64,
) -> ProgressState {
    let previous = stored.unwrap_or(ProgressState {
        watched_seconds: 0,
        completed: false,
    });

    let duration_seconds = duration_seconds.clamp(0, MAX_LESSON_SECONDS);
    let mut watched = previous
        .watched_seconds
        .max(reported_seconds.clamp(0, MAX_LESSON_SECONDS));
    if duration_seconds > 0 {
        watched = watched.min(duration_seconds);
    }

    let reached_threshold = duration_seconds > 0
        && i128::from(watched) * 100 >= i128::from(duration_seconds) * i128::from(AUTO_COMPLETE_PERCENT);

    ProgressState {
        watched_seconds: watched,
        completed: previous.completed || mark_completed || reached_threshold,
    }
}

/// floor(100 * completed / total); 0 for an empty course.
pub fn completion_percentage(completed: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    (completed.clamp(0, total) * 100) / total
}
