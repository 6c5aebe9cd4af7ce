//! WhatsApp Cloud API webhook
//!
//! GET answers the subscription handshake. POST receives message
//! notifications: every payload is stored in `webhook_events` first, then
//! decoded into the typed envelope below. Audio messages become voice
//! messages with a queued processing job; text messages are contractor
//! replies.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::db;
use crate::models::NewVoiceMessage;
use crate::services::reply_parser::handle_reply;
use crate::services::transcription::WHATSAPP_MEDIA_SCHEME;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// GET /api/webhooks/whatsapp
pub async fn verify(State(state): State<AppState>, Query(query): Query<VerifyQuery>) -> Response {
    let expected = state.config.whatsapp.verify_token.as_deref().filter(|t| !t.is_empty());

    match (query.mode.as_deref(), query.verify_token.as_deref(), expected, query.challenge) {
        (Some("subscribe"), Some(provided), Some(expected), Some(challenge))
            if rav_common::api::auth::tokens_match(provided, expected) =>
        {
            info!("WhatsApp webhook verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            warn!("WhatsApp webhook verification failed");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: Option<String>,
    pub value: ChangeValue,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    #[serde(flatten)]
    pub content: MessageContent,
}

/// Message body, tagged by the `type` field
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Audio { audio: MediaRef },
    Voice { voice: MediaRef },
    Text { text: TextBody },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub struct MediaRef {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub body: String,
}

/// What a single POST did, stored as the audit row outcome
#[derive(Debug, Default)]
struct Tally {
    voice_messages: usize,
    duplicates: usize,
    replies_applied: usize,
    ignored: usize,
    failures: usize,
}

impl Tally {
    fn summary(&self) -> String {
        format!(
            "voice={} duplicate={} replies={} ignored={} failed={}",
            self.voice_messages, self.duplicates, self.replies_applied, self.ignored, self.failures
        )
    }
}

async fn store_voice_message(
    state: &AppState,
    message: &InboundMessage,
    media: &MediaRef,
) -> rav_common::Result<Option<i64>> {
    let sender_phone = rav_common::phone::normalize(&message.from);
    let project = match &sender_phone {
        Some(phone) => db::projects::find_active_by_homeowner_phone(&state.db, phone).await?,
        None => None,
    };
    if project.is_none() {
        info!(from = %message.from, "Voice message from a number without an active project");
    }

    let new = NewVoiceMessage {
        project_id: project.as_ref().map(|p| p.id),
        sender_id: project.and_then(|p| p.homeowner_id),
        sender_phone,
        external_id: Some(message.id.clone()),
        audio_url: format!("{}{}", WHATSAPP_MEDIA_SCHEME, media.id),
        mime_type: media.mime_type.clone(),
        duration_seconds: None,
    };

    let Some(voice_message_id) = db::voice_messages::insert_voice_message(&state.db, &new).await?
    else {
        return Ok(None);
    };
    state.jobs.enqueue_voice_message(voice_message_id).await?;
    Ok(Some(voice_message_id))
}

async fn handle_message(state: &AppState, message: &InboundMessage, tally: &mut Tally) {
    match &message.content {
        MessageContent::Audio { audio: media } | MessageContent::Voice { voice: media } => {
            match store_voice_message(state, message, media).await {
                Ok(Some(voice_message_id)) => {
                    info!(voice_message_id, external_id = %message.id, "Voice message received");
                    tally.voice_messages += 1;
                }
                Ok(None) => {
                    info!(external_id = %message.id, "Duplicate voice message delivery, ignoring");
                    tally.duplicates += 1;
                }
                Err(e) => {
                    warn!(external_id = %message.id, error = %e, "Failed to store voice message");
                    tally.failures += 1;
                }
            }
        }
        MessageContent::Text { text } => match handle_reply(&state.db, &message.from, &text.body).await {
            Ok(Some(_)) => tally.replies_applied += 1,
            Ok(None) => tally.ignored += 1,
            Err(e) => {
                warn!(external_id = %message.id, error = %e, "Failed to apply reply");
                tally.failures += 1;
            }
        },
        MessageContent::Unsupported => tally.ignored += 1,
    }
}

/// POST /api/webhooks/whatsapp
pub async fn receive(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = String::from_utf8_lossy(&body);

    let event_id = match db::webhook_events::record(
        &state.db,
        "whatsapp",
        Some("messages"),
        None,
        &payload,
    )
    .await
    {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(error = %e, "Failed to record webhook event");
            None
        }
    };

    let outcome = match serde_json::from_slice::<WebhookEnvelope>(&body) {
        Ok(envelope) => {
            let mut tally = Tally::default();
            for change in envelope.entry.iter().flat_map(|e| &e.changes) {
                for message in &change.value.messages {
                    handle_message(&state, message, &mut tally).await;
                }
            }
            tally.summary()
        }
        Err(e) => {
            warn!(error = %e, "Malformed WhatsApp payload");
            format!("rejected: {}", e)
        }
    };

    if let Some(id) = event_id {
        if let Err(e) = db::webhook_events::set_outcome(&state.db, id, &outcome).await {
            warn!(event_id = id, error = %e, "Failed to record webhook outcome");
        }
    }

    (StatusCode::OK, Json(json!({ "success": true }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_audio_message() {
        let payload = r#"{
            "object": "whatsapp_business_account",
            "entry": [{"id": "1", "changes": [{"field": "messages", "value": {
                "messaging_product": "whatsapp",
                "messages": [{"from": "15550100", "id": "wamid.A", "timestamp": "1",
                              "type": "audio", "audio": {"id": "m1", "mime_type": "audio/ogg"}}]
            }}]}]
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(payload).unwrap();
        let message = &envelope.entry[0].changes[0].value.messages[0];
        match &message.content {
            MessageContent::Audio { audio } => {
                assert_eq!(audio.id, "m1");
                assert_eq!(audio.mime_type.as_deref(), Some("audio/ogg"));
            }
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let payload = r#"{"from": "1", "id": "x", "type": "sticker", "sticker": {"id": "s"}}"#;
        let message: InboundMessage = serde_json::from_str(payload).unwrap();
        assert!(matches!(message.content, MessageContent::Unsupported));
    }

    #[test]
    fn test_status_only_change_has_no_messages() {
        let payload = r#"{"entry": [{"changes": [{"value": {"statuses": [{"id": "x"}]}}]}]}"#;
        let envelope: WebhookEnvelope = serde_json::from_str(payload).unwrap();
        assert!(envelope.entry[0].changes[0].value.messages.is_empty());
    }
}
