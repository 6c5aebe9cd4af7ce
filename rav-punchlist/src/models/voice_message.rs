//! Voice messages and their transcriptions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

db_enum! {
    /// Lifecycle of an inbound voice message
    ///
    /// `received → transcribing → transcribed | failed`; only the
    /// transcription stage moves a message between states.
    VoiceMessageStatus {
        Received => "received",
        Transcribing => "transcribing",
        Transcribed => "transcribed",
        Failed => "failed",
    }
}

db_enum! {
    /// State of the extraction claim for one voice message
    ExtractionRunStatus {
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceMessage {
    pub id: i64,
    pub project_id: Option<i64>,
    pub sender_id: Option<String>,
    pub sender_phone: Option<String>,
    /// Provider message id, used to ignore webhook redeliveries
    pub external_id: Option<String>,
    pub audio_url: String,
    pub mime_type: Option<String>,
    pub duration_seconds: Option<f64>,
    pub status: VoiceMessageStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewVoiceMessage {
    pub project_id: Option<i64>,
    pub sender_id: Option<String>,
    pub sender_phone: Option<String>,
    pub external_id: Option<String>,
    pub audio_url: String,
    pub mime_type: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// Immutable transcript of one voice message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceTranscription {
    pub voice_message_id: i64,
    pub transcription_text: String,
    pub confidence_score: Option<f64>,
    pub language: Option<String>,
    pub processing_time_ms: i64,
    pub service_name: String,
    pub created_at: DateTime<Utc>,
}
