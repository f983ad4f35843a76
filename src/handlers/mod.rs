pub mod access;
pub mod account;
pub mod admin;
pub mod public;
pub mod webhooks;

use axum::Router;

use crate::config::RateLimitConfig;
use crate::db::AppState;

/// Every API route, with state applied. HTTP layers (CORS, tracing, body
/// limits) are added by the binary.
pub fn app(state: AppState, rate_limit: Option<RateLimitConfig>) -> Router {
    Router::new()
        .merge(public::router(rate_limit))
        .merge(webhooks::router())
        .merge(account::router(state.clone(), rate_limit))
        .merge(admin::router(state.clone()))
        .with_state(state)
}
