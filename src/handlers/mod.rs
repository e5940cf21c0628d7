//! HTTP handlers for notification resources and secrets.

pub mod resource;
pub mod secret;
pub use resource::*;
pub use secret::*;
