use serde::{Deserialize, Serialize};

use crate::models::UserRole;

/// Custom claims carried by a session token.
/// Standard claims (iss, sub, iat, exp) are handled by jwt-simple; `sub` is the user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Role at issue time. Authorization re-reads the user, so this is a hint
    /// for clients only.
    pub role: UserRole,
}

/// A verified session token.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub role: UserRole,
    pub expires_at: i64,
}
