use axum::http::{HeaderValue, Method, header};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use coursehub::chat::ChatHub;
use coursehub::config::Config;
use coursehub::db::{AppState, NewsletterSettings, create_pool, init_audit_db, init_db, queries};
use coursehub::email::EmailService;
use coursehub::fulfillment;
use coursehub::handlers;
use coursehub::jwt::SessionKeys;
use coursehub::models::{
    AuditAction, CouponKind, CourseLevel, CreateCoupon, CreateCourse, CreateLesson, CreateModule,
    CreateUser, UserRole,
};
use coursehub::payments::{MercadoPagoClient, StripeClient};
use coursehub::rate_limit::LoginRateLimiter;
use coursehub::storage::BlobStore;
use coursehub::util::AuditLogBuilder;

/// Processed webhook event ids older than this are forgotten.
const WEBHOOK_EVENT_RETENTION_DAYS: i64 = 30;

#[derive(Parser, Debug)]
#[command(name = "coursehub")]
#[command(about = "Backend for selling and teaching online video courses")]
struct Cli {
    /// Seed the database with dev data (users, a published course, a coupon)
    #[arg(long)]
    seed: bool,

    /// Delete databases on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

fn bootstrap_admin(state: &AppState, email: &str) {
    let conn = state.db.get().expect("Failed to get db connection for bootstrap");
    let audit_conn = state.audit.get().expect("Failed to get audit db connection");

    let admins = queries::count_admins(&conn).expect("Failed to count admins");
    if admins > 0 {
        tracing::info!("An admin already exists, skipping bootstrap");
        return;
    }

    // Promote an existing account rather than colliding on the email
    let admin = match queries::get_user_by_email(&conn, email).expect("Failed to look up user") {
        Some(user) => queries::set_user_role(&conn, &user.id, UserRole::Admin)
            .expect("Failed to promote bootstrap admin")
            .expect("Bootstrap user vanished"),
        None => queries::create_user(
            &conn,
            &CreateUser {
                email: email.to_string(),
                name: "Administrator".to_string(),
                role: UserRole::Admin,
            },
        )
        .expect("Failed to create bootstrap admin"),
    };

    let details = serde_json::json!({ "email": admin.email });
    AuditLogBuilder::system(&audit_conn, state.audit_log_enabled)
        .action(AuditAction::BootstrapAdmin)
        .resource("user", &admin.id)
        .details(&details)
        .save()
        .expect("Failed to create audit log for bootstrap");

    tracing::info!("============================================");
    tracing::info!("BOOTSTRAP ADMIN READY");
    tracing::info!("Email: {}", admin.email);
    tracing::info!("Sign in with POST /auth/request-code");
    tracing::info!("============================================");
}

/// Seeds the database with dev data.
/// Creates: admin, instructor, student, one published course and a coupon.
/// Only runs in dev mode and when no users exist.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");
    let audit_conn = state.audit.get().expect("Failed to get audit db connection");

    let existing = queries::list_all_user_ids(&conn).expect("Failed to list users");
    if !existing.is_empty() {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let mut users = Vec::new();
    for (email, name, role) in [
        ("admin@coursehub.local", "Dev Admin", UserRole::Admin),
        ("instructor@coursehub.local", "Dev Instructor", UserRole::Instructor),
        ("student@coursehub.local", "Dev Student", UserRole::Student),
    ] {
        let user = queries::create_user(
            &conn,
            &CreateUser {
                email: email.to_string(),
                name: name.to_string(),
                role,
            },
        )
        .expect("Failed to create dev user");
        tracing::info!("User: {} ({})", user.email, user.role.as_ref());
        users.push(user);
    }
    let instructor = &users[1];

    let course = queries::create_course(
        &conn,
        &instructor.id,
        &CreateCourse {
            slug: "rust-from-scratch".to_string(),
            title: "Rust from Scratch".to_string(),
            subtitle: Some("Ownership, traits and async in practice".to_string()),
            description: "A hands-on introduction to Rust.".to_string(),
            price_cents: 4900,
            currency: None,
            level: Some(CourseLevel::Beginner),
            thumbnail_url: None,
            instructor_id: None,
        },
        &state.default_currency,
    )
    .expect("Failed to create dev course");

    let module = queries::create_module(
        &conn,
        &course.id,
        &CreateModule {
            title: "Getting started".to_string(),
            position: None,
        },
    )
    .expect("Failed to create dev module");

    for (title, is_preview) in [("Installing the toolchain", true), ("Ownership", false)] {
        queries::create_lesson(
            &conn,
            &module,
            &CreateLesson {
                title: title.to_string(),
                content: String::new(),
                duration_seconds: 600,
                is_preview,
                position: None,
            },
        )
        .expect("Failed to create dev lesson");
    }

    queries::set_course_published(&conn, &course.id, true).expect("Failed to publish dev course");
    tracing::info!("Course: {} (slug: {})", course.title, course.slug);

    let coupon = queries::create_coupon(
        &conn,
        &CreateCoupon {
            code: "WELCOME20".to_string(),
            kind: CouponKind::Percentage,
            value: 20,
            currency: None,
            max_uses: None,
            expires_at: None,
            course_id: None,
            active: true,
        },
    )
    .expect("Failed to create dev coupon");
    tracing::info!("Coupon: {} ({}% off)", coupon.code, coupon.value);

    let details = serde_json::json!({
        "users": users.len(),
        "course_id": course.id,
        "coupon": coupon.code,
    });
    AuditLogBuilder::system(&audit_conn, state.audit_log_enabled)
        .action(AuditAction::SeedData)
        .resource("system", "seed")
        .details(&details)
        .save()
        .expect("Failed to create audit log");

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");
}

/// Spawns a background task that periodically expires stale state.
/// Runs every 5 minutes: login codes, old webhook event ids, abandoned
/// purchases, idle chat channels and the login limiter.
fn spawn_cleanup_task(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(5 * 60);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => {
                    match queries::cleanup_expired_login_codes(&conn) {
                        Ok(count) if count > 0 => {
                            tracing::debug!("Cleaned up {} expired login codes", count);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Failed to cleanup login codes: {}", e),
                    }
                    match queries::purge_old_webhook_events(&conn, WEBHOOK_EVENT_RETENTION_DAYS) {
                        Ok(count) if count > 0 => {
                            tracing::debug!("Purged {} old webhook events", count);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Failed to purge webhook events: {}", e),
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to get db connection for cleanup: {}", e);
                }
            }

            if let Err(e) = fulfillment::expire_stale_purchases(&state) {
                tracing::warn!("Failed to expire stale purchases: {}", e);
            }

            let pruned = state.chat.prune();
            if pruned > 0 {
                tracing::debug!("Pruned {} idle chat channels", pruned);
            }

            state.login_rate_limiter.cleanup();
        }
    });

    tracing::info!("Background cleanup task started (runs every 5 minutes)");
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::RANGE])
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursehub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    let audit_pool =
        create_pool(&config.audit_database_path).expect("Failed to create audit database pool");

    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }
    {
        let conn = audit_pool.get().expect("Failed to get audit connection");
        init_audit_db(&conn).expect("Failed to initialize audit database");
    }

    let stripe = config.stripe.as_ref().map(StripeClient::new);
    let mercadopago = config.mercadopago.as_ref().map(MercadoPagoClient::new);
    if stripe.is_none() && mercadopago.is_none() {
        tracing::warn!("No payment gateway configured; only free checkouts will succeed");
    }

    let email_service = EmailService::new(config.resend_api_key.clone(), config.email_from.clone());
    if !email_service.is_enabled() {
        tracing::warn!("RESEND_API_KEY not set; emails will be logged, not sent");
    }

    let storage = BlobStore::from_settings(&config.storage);
    tracing::info!("Video storage backend: {}", storage.backend_name());

    let state = AppState {
        db: db_pool,
        audit: audit_pool,
        base_url: config.base_url.trim_end_matches('/').to_string(),
        audit_log_enabled: config.audit_log_enabled,
        session_keys: SessionKeys::new(&config.session_secret, config.session_ttl_hours),
        stripe,
        mercadopago,
        email_service: Arc::new(email_service),
        storage: Arc::new(storage),
        chat: ChatHub::new(),
        login_rate_limiter: LoginRateLimiter::default(),
        newsletter: NewsletterSettings {
            batch_size: config.newsletter_batch_size,
            batch_delay_ms: config.newsletter_batch_delay_ms,
        },
        default_currency: config.default_currency.clone(),
    };

    // Purge old audit logs on startup (0 = never purge)
    if config.audit_log_retention_days > 0 {
        let conn = state.audit.get().expect("Failed to get audit connection for purge");
        match queries::purge_old_audit_logs(&conn, config.audit_log_retention_days) {
            Ok(count) if count > 0 => {
                tracing::info!(
                    "Purged {} audit log entries older than {} days",
                    count,
                    config.audit_log_retention_days
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to purge old audit logs: {}", e);
            }
        }
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set COURSEHUB_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    if let Some(ref email) = config.bootstrap_admin_email {
        bootstrap_admin(&state, email);
    }

    spawn_cleanup_task(state.clone());

    let app = handlers::app(state, Some(config.rate_limit))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    let audit_path = config.audit_database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: databases will be deleted on exit");
    }

    tracing::info!("CourseHub server listening on {}", addr);

    // Peer addresses are needed by the per-IP rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral databases...");
        for path in [&db_path, &audit_path] {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("Failed to remove {}: {}", path, e);
            } else {
                tracing::info!("Removed {}", path);
            }
            let _ = std::fs::remove_file(format!("{}-wal", path));
            let _ = std::fs::remove_file(format!("{}-shm", path));
        }
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
