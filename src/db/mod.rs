pub mod from_row;
pub mod queries;
mod schema;

pub use schema::{init_audit_db, init_db};

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::chat::ChatHub;
use crate::email::EmailService;
use crate::jwt::SessionKeys;
use crate::payments::{MercadoPagoClient, StripeClient};
use crate::rate_limit::LoginRateLimiter;
use crate::storage::BlobStore;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Newsletter delivery pacing.
#[derive(Debug, Clone, Copy)]
pub struct NewsletterSettings {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

impl Default for NewsletterSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 1000,
        }
    }
}

/// Application state holding database pools, clients and configuration
#[derive(Clone)]
pub struct AppState {
    /// Main database pool (users, catalog, purchases, progress, messaging)
    pub db: DbPool,
    /// Audit log database pool (separate file to isolate growth)
    pub audit: DbPool,
    /// Public base URL used for gateway callbacks and links in emails
    pub base_url: String,
    pub audit_log_enabled: bool,
    pub session_keys: SessionKeys,
    pub stripe: Option<StripeClient>,
    pub mercadopago: Option<MercadoPagoClient>,
    pub email_service: Arc<EmailService>,
    pub storage: Arc<BlobStore>,
    /// Live support chat channels
    pub chat: ChatHub,
    pub login_rate_limiter: LoginRateLimiter,
    pub newsletter: NewsletterSettings,
    /// Currency for courses created without one
    pub default_currency: String,
}

/// Open a pooled SQLite database. Every connection gets foreign keys,
/// a busy timeout and WAL journaling.
pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA journal_mode = WAL;",
        )
    });
    Pool::builder().max_size(10).build(manager)
}
