//! CourseHub - backend for selling and teaching online video courses
//!
//! Catalog, cart and coupons, checkout through Stripe or Mercado Pago with
//! webhook reconciliation, enrollments and progress, certificates,
//! notifications, newsletter, support chat and admin reporting.

pub mod chat;
pub mod config;
pub mod crypto;
pub mod db;
pub mod email;
pub mod error;
pub mod extractors;
pub mod fulfillment;
pub mod handlers;
pub mod id;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod payments;
pub mod pdf;
pub mod pricing;
pub mod progress;
pub mod rate_limit;
pub mod storage;
pub mod util;
