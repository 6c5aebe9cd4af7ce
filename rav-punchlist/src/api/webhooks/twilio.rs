//! Twilio inbound SMS/WhatsApp webhook
//!
//! Replies are form-encoded. The response is always an empty TwiML
//! document so Twilio neither retries nor sends an auto-reply.

use axum::{
    extract::{rejection::FormRejection, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db;
use crate::services::reply_parser::handle_reply;
use crate::AppState;

const EMPTY_TWIML: &str = "<Response></Response>";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TwilioInbound {
    #[serde(rename = "From", default)]
    pub from: Option<String>,
    #[serde(rename = "Body", default)]
    pub body: Option<String>,
    #[serde(rename = "MessageSid", default)]
    pub message_sid: Option<String>,
}

fn twiml() -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, "text/xml")], EMPTY_TWIML).into_response()
}

/// POST /api/webhooks/twilio (and /api/webhooks/twilio-test)
pub async fn receive(
    State(state): State<AppState>,
    form: Result<Form<TwilioInbound>, FormRejection>,
) -> Response {
    let inbound = match form {
        Ok(Form(inbound)) => inbound,
        Err(e) => {
            warn!(error = %e, "Malformed Twilio payload");
            return twiml();
        }
    };

    let payload = serde_json::to_string(&inbound).unwrap_or_default();
    let event_id = db::webhook_events::record(
        &state.db,
        "twilio",
        Some("inbound_message"),
        inbound.message_sid.as_deref(),
        &payload,
    )
    .await
    .map_err(|e| warn!(error = %e, "Failed to record webhook event"))
    .ok();

    let (Some(from), Some(body)) = (inbound.from.as_deref(), inbound.body.as_deref()) else {
        info!("Twilio message without sender or body, ignoring");
        return twiml();
    };

    let outcome = match handle_reply(&state.db, from, body).await {
        Ok(Some(update)) => format!(
            "assignment {} -> {}",
            update.assignment_id, update.new_status
        ),
        Ok(None) => "ignored".to_string(),
        Err(e) => {
            warn!(error = %e, "Failed to apply reply");
            format!("failed: {}", e)
        }
    };

    if let Some(id) = event_id {
        if let Err(e) = db::webhook_events::set_outcome(&state.db, id, &outcome).await {
            warn!(event_id = id, error = %e, "Failed to record webhook outcome");
        }
    }

    twiml()
}
