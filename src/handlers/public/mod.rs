mod auth;
mod catalog;
mod newsletter;
mod video;

pub use auth::*;
pub use catalog::*;
pub use newsletter::*;
pub use video::*;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::db::AppState;
use crate::rate_limit;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Unauthenticated routes. Rate limits are skipped when `rate_limit` is
/// `None` (tests have no peer address to key on).
pub fn router(rate_limit: Option<RateLimitConfig>) -> Router<AppState> {
    let mut sign_in = Router::new()
        .route("/auth/request-code", post(request_login_code))
        .route("/auth/verify", post(verify_login_code));

    let mut public = Router::new()
        .route("/courses", get(list_courses))
        .route("/courses/{slug}", get(get_course))
        .route("/certificates/verify/{code}", get(verify_certificate))
        .route("/newsletter/subscribe", post(subscribe))
        .route("/newsletter/unsubscribe", get(unsubscribe))
        .route("/learn/lessons/{lesson_id}/video", get(stream_lesson_video));

    if let Some(limits) = rate_limit {
        sign_in = sign_in.layer(rate_limit::strict_layer(limits.strict_rpm));
        public = public.layer(rate_limit::standard_layer(limits.standard_rpm));
    }

    Router::new()
        .route("/health", get(health))
        .merge(sign_in)
        .merge(public)
}
