//! HTTP API handlers for rav-punchlist

pub mod auth;
pub mod cron;
pub mod health;
pub mod items;
pub mod process;
pub mod webhooks;

pub use auth::{require_admin, require_caller, Caller};
pub use cron::cron_routes;
pub use health::health_routes;
pub use items::item_routes;
pub use process::process_routes;
pub use webhooks::webhook_routes;
