//! Rate limiting for public endpoints.
//!
//! Per-IP limits are applied as tower layers:
//! - Strict: /auth/*, /checkout (emails sent, gateway calls made)
//! - Standard: the rest of the public surface (catalog, newsletter, certificate verify)
//!
//! Sign-in code requests are additionally limited per email address, so one
//! inbox cannot be flooded from many IPs.
//!
//! Configure via environment variables:
//! - RATE_LIMIT_STRICT_RPM (default: 10)
//! - RATE_LIMIT_STANDARD_RPM (default: 60)

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;

/// Sign-in code requests allowed per email per hour.
pub const LOGIN_CODES_PER_HOUR: u32 = 5;

/// Rate limiter layer type alias using governor types directly
pub type RateLimitLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Creates a rate limiter layer with the specified requests per minute.
fn create_layer(requests_per_minute: u32) -> RateLimitLayer {
    assert!(requests_per_minute > 0, "Rate limit must be greater than 0");

    let period_ms = 60_000 / requests_per_minute as u64;
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_millis(period_ms.max(1)))
        .burst_size(requests_per_minute)
        .finish()
        .expect("Failed to build rate limiter config");

    GovernorLayer::new(Arc::new(config))
}

/// Creates a rate limiter layer for the strict tier.
pub fn strict_layer(requests_per_minute: u32) -> RateLimitLayer {
    create_layer(requests_per_minute)
}

/// Creates a rate limiter layer for the standard tier.
pub fn standard_layer(requests_per_minute: u32) -> RateLimitLayer {
    create_layer(requests_per_minute)
}

/// In-memory per-email limiter for sign-in code requests.
#[derive(Clone)]
pub struct LoginRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl LoginRateLimiter {
    pub fn new(per_hour: u32) -> Self {
        let per_hour = NonZeroU32::new(per_hour).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_hour(per_hour))),
        }
    }

    /// Consume one request for `email`. Returns false when over the limit.
    pub fn check(&self, email: &str) -> bool {
        self.limiter.check_key(&email.to_string()).is_ok()
    }

    /// Drop keys whose quota has fully replenished.
    pub fn cleanup(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(LOGIN_CODES_PER_HOUR)
    }
}
