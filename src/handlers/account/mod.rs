mod cart;
mod certificates;
mod checkout;
mod learn;
mod me;
mod notifications;
mod support;

pub use cart::*;
pub use certificates::*;
pub use checkout::*;
pub use learn::*;
pub use me::*;
pub use notifications::*;
pub use support::*;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::config::RateLimitConfig;
use crate::db::AppState;
use crate::middleware::require_user;
use crate::rate_limit;

/// Routes for any signed-in user.
pub fn router(state: AppState, rate_limit: Option<RateLimitConfig>) -> Router<AppState> {
    let mut checkout_routes = Router::new().route("/checkout", post(checkout));
    if let Some(limits) = rate_limit {
        checkout_routes = checkout_routes.layer(rate_limit::strict_layer(limits.strict_rpm));
    }

    let mut authenticated = Router::new()
        .route("/me", get(get_me).put(update_me))
        // Cart
        .route("/cart", get(get_cart).delete(clear_cart))
        .route("/cart/items", post(add_cart_item))
        .route("/cart/items/{course_id}", delete(remove_cart_item))
        .route("/cart/quote", post(quote_cart))
        // Purchases
        .route("/purchases", get(list_my_purchases))
        .route("/purchases/{id}", get(get_purchase))
        // Learning
        .route("/learn/courses", get(list_my_courses))
        .route(
            "/learn/courses/{course_id}/lessons/{lesson_id}",
            get(get_lesson),
        )
        .route(
            "/learn/courses/{course_id}/lessons/{lesson_id}/progress",
            post(update_progress),
        )
        .route("/learn/courses/{course_id}/progress", get(get_progress))
        .route("/certificates", get(list_my_certificates))
        .route("/certificates/{id}/pdf", get(download_certificate_pdf))
        // Notifications
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/{id}/read", post(mark_read))
        // Support
        .route(
            "/support/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/support/conversations/{id}/messages",
            get(get_messages).post(send_message),
        )
        .route("/support/conversations/{id}/close", post(close_conversation))
        .merge(checkout_routes);

    if let Some(limits) = rate_limit {
        authenticated = authenticated.layer(rate_limit::standard_layer(limits.standard_rpm));
    }

    // The socket authenticates with `?token=` since browsers cannot set
    // headers on the upgrade request.
    Router::new()
        .merge(authenticated.layer(middleware::from_fn_with_state(state, require_user)))
        .route("/support/conversations/{id}/ws", get(conversation_ws))
}
