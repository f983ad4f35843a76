mod audit_log;
mod cart;
mod coupon;
mod course;
mod learning;
mod newsletter;
mod notification;
mod purchase;
mod report;
mod support;
mod transaction;
mod user;

pub use audit_log::*;
pub use cart::*;
pub use coupon::*;
pub use course::*;
pub use learning::*;
pub use newsletter::*;
pub use notification::*;
pub use purchase::*;
pub use report::*;
pub use support::*;
pub use transaction::*;
pub use user::*;
