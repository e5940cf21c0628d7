//! Route builders.

mod common;
mod notification;
pub use common::common_routes;
pub use notification::notification_routes;
