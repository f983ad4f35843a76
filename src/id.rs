//! Prefixed ID generation for CourseHub entities.
//!
//! All IDs use a `ch_` brand prefix so they never collide with payment
//! gateway identifiers (Stripe's `cs_`, `pi_`, Mercado Pago numeric ids).
//!
//! Format: `ch_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "ch_usr_", "ch_crs_", "ch_mod_", "ch_les_", "ch_cpn_", "ch_pur_", "ch_pit_", "ch_enr_",
    "ch_txn_", "ch_cert_", "ch_ntf_", "ch_sub_", "ch_cmp_", "ch_conv_", "ch_msg_", "ch_aud_",
];

/// Validate that a string is a well-formed prefixed ID.
///
/// Rejects garbage before it reaches the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    User,
    Course,
    Module,
    Lesson,
    Coupon,
    Purchase,
    PurchaseItem,
    Enrollment,
    Transaction,
    Certificate,
    Notification,
    Subscriber,
    Campaign,
    Conversation,
    Message,
    AuditLog,
}

impl EntityType {
    pub const ALL: [EntityType; 16] = [
        Self::User,
        Self::Course,
        Self::Module,
        Self::Lesson,
        Self::Coupon,
        Self::Purchase,
        Self::PurchaseItem,
        Self::Enrollment,
        Self::Transaction,
        Self::Certificate,
        Self::Notification,
        Self::Subscriber,
        Self::Campaign,
        Self::Conversation,
        Self::Message,
        Self::AuditLog,
    ];

    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::User => "ch_usr",
            Self::Course => "ch_crs",
            Self::Module => "ch_mod",
            Self::Lesson => "ch_les",
            Self::Coupon => "ch_cpn",
            Self::Purchase => "ch_pur",
            Self::PurchaseItem => "ch_pit",
            Self::Enrollment => "ch_enr",
            Self::Transaction => "ch_txn",
            Self::Certificate => "ch_cert",
            Self::Notification => "ch_ntf",
            Self::Subscriber => "ch_sub",
            Self::Campaign => "ch_cmp",
            Self::Conversation => "ch_conv",
            Self::Message => "ch_msg",
            Self::AuditLog => "ch_aud",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
