//! Test utilities and fixtures for CourseHub integration tests

#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

// Re-export the main library crate
pub use coursehub::chat::ChatHub;
pub use coursehub::config::{MercadoPagoSettings, StripeSettings};
pub use coursehub::db::{AppState, NewsletterSettings, create_pool, init_audit_db, init_db, queries};
pub use coursehub::email::EmailService;
pub use coursehub::handlers;
pub use coursehub::jwt::SessionKeys;
pub use coursehub::models::*;
pub use coursehub::payments::{MercadoPagoClient, PaymentProvider, StripeClient};
pub use coursehub::rate_limit::LoginRateLimiter;
pub use coursehub::storage::BlobStore;

pub const TEST_SESSION_SECRET: &str = "test-session-secret";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test123secret456";

/// App state backed by SQLite files in a temporary directory. The directory
/// is removed when the value is dropped, so keep it alive for the test.
pub struct TestApp {
    pub state: AppState,
    pub dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_gateways(None, None)
    }

    pub fn with_gateways(
        stripe: Option<StripeSettings>,
        mercadopago: Option<MercadoPagoSettings>,
    ) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = |name: &str| dir.path().join(name).to_string_lossy().into_owned();

        let db = create_pool(&path("coursehub.db")).expect("Failed to create pool");
        init_db(&db.get().unwrap()).expect("Failed to initialize schema");
        let audit = create_pool(&path("audit.db")).expect("Failed to create audit pool");
        init_audit_db(&audit.get().unwrap()).expect("Failed to initialize audit schema");

        let state = AppState {
            db,
            audit,
            base_url: "http://localhost:3000".to_string(),
            audit_log_enabled: true,
            session_keys: SessionKeys::new(TEST_SESSION_SECRET, 24),
            stripe: stripe.as_ref().map(StripeClient::new),
            mercadopago: mercadopago
                .as_ref()
                .map(|s| MercadoPagoClient::new(s).with_retry_delays(vec![])),
            email_service: Arc::new(EmailService::new(None, "test@example.com".to_string())),
            storage: Arc::new(BlobStore::local(dir.path().join("media"))),
            chat: ChatHub::new(),
            login_rate_limiter: LoginRateLimiter::default(),
            newsletter: NewsletterSettings {
                batch_size: 2,
                batch_delay_ms: 0,
            },
            default_currency: "usd".to_string(),
        };

        Self { state, dir }
    }

    /// Full router without rate limiting (no peer address in oneshot requests)
    pub fn router(&self) -> Router {
        handlers::app(self.state.clone(), None)
    }

    pub fn conn(&self) -> PooledConnection<SqliteConnectionManager> {
        self.state.db.get().expect("Failed to get connection")
    }

    pub fn audit_conn(&self) -> PooledConnection<SqliteConnectionManager> {
        self.state.audit.get().expect("Failed to get audit connection")
    }

    /// Send a request and decode the JSON body (`Null` when empty).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }
}

pub fn stripe_settings(api_base: &str) -> StripeSettings {
    StripeSettings {
        secret_key: "sk_test_xxx".to_string(),
        webhook_secret: STRIPE_WEBHOOK_SECRET.to_string(),
        api_base: api_base.to_string(),
    }
}

pub fn mercadopago_settings(api_base: &str, webhook_secret: Option<&str>) -> MercadoPagoSettings {
    MercadoPagoSettings {
        access_token: "TEST-token".to_string(),
        webhook_secret: webhook_secret.map(String::from),
        api_base: api_base.to_string(),
    }
}

// ============ Requests ============

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    empty_request("GET", uri, token)
}

// ============ Fixtures ============

pub fn create_test_user(conn: &Connection, email: &str, role: UserRole) -> User {
    queries::create_user(
        conn,
        &CreateUser {
            email: email.to_string(),
            name: format!("Test {}", email),
            role,
        },
    )
    .expect("Failed to create test user")
}

pub fn token_for(state: &AppState, user: &User) -> String {
    state
        .session_keys
        .issue(&user.id, user.role)
        .expect("Failed to issue session token")
        .0
}

/// A course with one module of `lessons` lessons, the first a free preview.
pub fn create_test_course(
    conn: &Connection,
    instructor_id: &str,
    slug: &str,
    price_cents: i64,
    lessons: usize,
    published: bool,
) -> (Course, Vec<Lesson>) {
    let course = queries::create_course(
        conn,
        instructor_id,
        &CreateCourse {
            slug: slug.to_string(),
            title: format!("Course {}", slug),
            subtitle: None,
            description: "Test course".to_string(),
            price_cents,
            currency: Some("usd".to_string()),
            level: None,
            thumbnail_url: None,
            instructor_id: None,
        },
        "usd",
    )
    .expect("Failed to create test course");

    let module = queries::create_module(
        conn,
        &course.id,
        &CreateModule {
            title: "Module 1".to_string(),
            position: None,
        },
    )
    .expect("Failed to create test module");

    let lessons = (0..lessons)
        .map(|i| {
            queries::create_lesson(
                conn,
                &module,
                &CreateLesson {
                    title: format!("Lesson {}", i + 1),
                    content: format!("Content {}", i + 1),
                    duration_seconds: 100,
                    is_preview: i == 0,
                    position: None,
                },
            )
            .expect("Failed to create test lesson")
        })
        .collect();

    let course = if published {
        queries::set_course_published(conn, &course.id, true)
            .expect("Failed to publish test course")
            .expect("Test course vanished")
    } else {
        course
    };

    (course, lessons)
}

pub fn create_test_coupon(
    conn: &Connection,
    code: &str,
    kind: CouponKind,
    value: i64,
    max_uses: Option<i64>,
) -> Coupon {
    queries::create_coupon(
        conn,
        &CreateCoupon {
            code: code.to_string(),
            kind,
            value,
            currency: if kind == CouponKind::Fixed {
                Some("usd".to_string())
            } else {
                None
            },
            max_uses,
            expires_at: None,
            course_id: None,
            active: true,
        },
    )
    .expect("Failed to create test coupon")
}

/// A pending purchase of `courses` through `provider`, priced at the courses'
/// list prices.
pub fn create_pending_purchase(
    conn: &mut Connection,
    user_id: &str,
    courses: &[&Course],
    provider: PaymentProvider,
) -> Purchase {
    let total: i64 = courses.iter().map(|c| c.price_cents).sum();
    let tx = conn.transaction().unwrap();
    let purchase = queries::create_purchase(
        &tx,
        &CreatePurchase {
            user_id: user_id.to_string(),
            currency: "usd".to_string(),
            subtotal_cents: total,
            discount_cents: 0,
            total_cents: total,
            coupon_id: None,
            coupon_code: None,
            provider,
            items: courses
                .iter()
                .map(|c| (c.id.clone(), c.title.clone(), c.price_cents))
                .collect(),
        },
    )
    .expect("Failed to create test purchase");
    tx.commit().unwrap();
    purchase.purchase
}

pub fn purchase_status(conn: &Connection, id: &str) -> PurchaseStatus {
    queries::get_purchase_by_id(conn, id)
        .unwrap()
        .expect("purchase should exist")
        .status
}

// ============ Webhook signatures ============

/// `stripe-signature` header for `payload` signed now.
pub fn stripe_signature_header(payload: &[u8], secret: &str) -> String {
    stripe_signature_header_at(payload, secret, chrono::Utc::now().timestamp())
}

pub fn stripe_signature_header_at(payload: &[u8], secret: &str, timestamp: i64) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

pub fn stripe_webhook_request(payload: &Value) -> Request<Body> {
    let body = serde_json::to_vec(payload).unwrap();
    let signature = stripe_signature_header(&body, STRIPE_WEBHOOK_SECRET);
    Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("content-type", "application/json")
        .header("stripe-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

// ============ Mock gateway ============

/// Serve `router` on an ephemeral local port; returns its base URL.
pub async fn spawn_mock_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
