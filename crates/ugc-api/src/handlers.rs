//! HTTP handlers.

pub mod credits;
pub mod health;
pub mod videos;
pub mod webhooks;

pub use health::{health, ready};
