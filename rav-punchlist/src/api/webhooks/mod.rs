//! Inbound messaging webhooks
//!
//! Both providers retry on anything but a 2xx, so these handlers log and
//! swallow internal failures instead of returning them.

pub mod twilio;
pub mod whatsapp;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/webhooks/whatsapp",
            get(whatsapp::verify).post(whatsapp::receive),
        )
        .route("/api/webhooks/twilio", post(twilio::receive))
        .route("/api/webhooks/twilio-test", post(twilio::receive))
}
