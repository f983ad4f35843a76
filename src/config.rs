use std::env;

/// Per-IP rate limits for public endpoints (requests per minute).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Sign-in and checkout endpoints
    pub strict_rpm: u32,
    /// Everything else that is public
    pub standard_rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strict_rpm: 10,
            standard_rpm: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct MercadoPagoSettings {
    pub access_token: String,
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub enum StorageSettings {
    Local {
        dir: String,
    },
    Azure {
        account: String,
        access_key: String,
        container: String,
        /// Override for Azurite or sovereign clouds
        endpoint: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub audit_database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    pub session_secret: String,
    pub session_ttl_hours: u64,
    pub bootstrap_admin_email: Option<String>,
    pub audit_log_enabled: bool,
    /// 0 = keep forever
    pub audit_log_retention_days: i64,
    pub default_currency: String,
    pub stripe: Option<StripeSettings>,
    pub mercadopago: Option<MercadoPagoSettings>,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub storage: StorageSettings,
    pub newsletter_batch_size: usize,
    pub newsletter_batch_delay_ms: u64,
    pub rate_limit: RateLimitConfig,
    pub cors_origins: Vec<String>,
}

/// HS256 keys shorter than 96 bits are refused by the token signer.
pub const MIN_SESSION_SECRET_BYTES: usize = 12;

/// Check a session secret before any token is signed with it.
pub fn validate_session_secret(secret: &str) -> Result<(), String> {
    if secret.len() < MIN_SESSION_SECRET_BYTES {
        return Err(format!(
            "SESSION_SECRET must be at least {} bytes, got {}",
            MIN_SESSION_SECRET_BYTES,
            secret.len()
        ));
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("COURSEHUB_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_parse("PORT", 3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let session_secret = match env_opt("SESSION_SECRET") {
            Some(secret) => secret,
            None if dev_mode => {
                tracing::warn!("SESSION_SECRET not set, using an insecure development secret");
                "coursehub-dev-session-secret".to_string()
            }
            None => panic!("SESSION_SECRET must be set outside of dev mode"),
        };
        if let Err(e) = validate_session_secret(&session_secret) {
            panic!("{}", e);
        }

        let stripe = env_opt("STRIPE_SECRET_KEY").map(|secret_key| StripeSettings {
            secret_key,
            webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
        });

        let mercadopago = env_opt("MERCADOPAGO_ACCESS_TOKEN").map(|access_token| {
            MercadoPagoSettings {
                access_token,
                webhook_secret: env_opt("MERCADOPAGO_WEBHOOK_SECRET"),
                api_base: env::var("MERCADOPAGO_API_BASE")
                    .unwrap_or_else(|_| "https://api.mercadopago.com".to_string()),
            }
        });

        let storage = match env::var("STORAGE_BACKEND").as_deref() {
            Ok("azure") => StorageSettings::Azure {
                account: env::var("AZURE_STORAGE_ACCOUNT")
                    .expect("AZURE_STORAGE_ACCOUNT must be set when STORAGE_BACKEND=azure"),
                access_key: env::var("AZURE_STORAGE_KEY")
                    .expect("AZURE_STORAGE_KEY must be set when STORAGE_BACKEND=azure"),
                container: env::var("AZURE_STORAGE_CONTAINER")
                    .unwrap_or_else(|_| "coursehub".to_string()),
                endpoint: env_opt("AZURE_STORAGE_ENDPOINT"),
            },
            _ => StorageSettings::Local {
                dir: env::var("STORAGE_LOCAL_DIR").unwrap_or_else(|_| "media".to_string()),
            },
        };

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "coursehub.db".to_string()),
            audit_database_path: env::var("AUDIT_DATABASE_PATH")
                .unwrap_or_else(|_| "coursehub_audit.db".to_string()),
            base_url,
            dev_mode,
            session_secret,
            session_ttl_hours: env_parse("SESSION_TTL_HOURS", 24 * 7),
            bootstrap_admin_email: env_opt("BOOTSTRAP_ADMIN_EMAIL"),
            audit_log_enabled: env_parse("AUDIT_LOG_ENABLED", true),
            audit_log_retention_days: env_parse("AUDIT_LOG_RETENTION_DAYS", 0),
            default_currency: env::var("DEFAULT_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|_| "usd".to_string()),
            stripe,
            mercadopago,
            resend_api_key: env_opt("RESEND_API_KEY"),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "CourseHub <no-reply@coursehub.local>".to_string()),
            storage,
            newsletter_batch_size: env_parse("NEWSLETTER_BATCH_SIZE", 50usize).max(1),
            newsletter_batch_delay_ms: env_parse("NEWSLETTER_BATCH_DELAY_MS", 1000),
            rate_limit: RateLimitConfig {
                strict_rpm: env_parse("RATE_LIMIT_STRICT_RPM", 10u32).max(1),
                standard_rpm: env_parse("RATE_LIMIT_STANDARD_RPM", 60u32).max(1),
            },
            cors_origins,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_session_secret_is_rejected() {
        assert!(validate_session_secret("secret-one").is_err());
        assert!(validate_session_secret("").is_err());
        assert!(validate_session_secret("twelve-bytes").is_ok());
        assert!(validate_session_secret("coursehub-dev-session-secret").is_ok());
    }
}
