use jwt_simple::prelude::*;

use super::{Session, SessionClaims};
use crate::error::{AppError, Result};
use crate::models::UserRole;

const ISSUER: &str = "coursehub";

/// HS256 key plus token lifetime, shared through `AppState`.
#[derive(Clone)]
pub struct SessionKeys {
    key: HS256Key,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl_hours: u64) -> Self {
        Self {
            key: HS256Key::from_bytes(secret.as_bytes()),
            ttl: Duration::from_hours(ttl_hours.max(1)),
        }
    }

    /// Sign a session token for `user_id`. Returns the token and its expiry (unix seconds).
    pub fn issue(&self, user_id: &str, role: UserRole) -> Result<(String, i64)> {
        let claims = Claims::with_custom_claims(SessionClaims { role }, self.ttl)
            .with_issuer(ISSUER)
            .with_subject(user_id);
        let expires_at = claims
            .expires_at
            .map(|t| t.as_secs() as i64)
            .unwrap_or_default();

        let token = self
            .key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))?;
        Ok((token, expires_at))
    }

    /// Verify signature, issuer and expiry. Any failure is `Unauthorized`.
    pub fn verify(&self, token: &str) -> Result<Session> {
        let options = VerificationOptions {
            allowed_issuers: Some(HashSet::from_strings(&[ISSUER])),
            ..Default::default()
        };
        let claims = self
            .key
            .verify_token::<SessionClaims>(token, Some(options))
            .map_err(|e| {
                tracing::debug!("Rejected session token: {}", e);
                AppError::Unauthorized
            })?;

        let user_id = claims.subject.ok_or(AppError::Unauthorized)?;
        Ok(Session {
            user_id,
            role: claims.custom.role,
            expires_at: claims
                .expires_at
                .map(|t| t.as_secs() as i64)
                .unwrap_or_default(),
        })
    }
}
