//! TRANSCRIBE: `received` voice messages → transcript rows

use rav_common::Result;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{ItemOutcome, PunchListPipeline, StageReport, StageScope, STAGE_TRANSCRIBE};
use crate::db;
use crate::db::transcriptions::TranscriptionRecord;
use crate::models::{VoiceMessage, VoiceMessageStatus};

impl PunchListPipeline {
    pub(super) async fn stage_transcribe(&self, scope: StageScope) -> Result<StageReport> {
        let mut report = StageReport::new(STAGE_TRANSCRIBE);

        if !self.transcriber.is_configured() {
            warn!("Transcriber not configured, leaving voice messages untouched");
            report.note = Some("transcriber not configured".to_string());
            return Ok(report);
        }

        let released =
            db::voice_messages::release_stale_claims(&self.db, self.settings.stale_claim_minutes)
                .await?;
        if released > 0 {
            info!(released, "Released stale transcription claims");
        }

        let messages = db::voice_messages::list_by_status(
            &self.db,
            VoiceMessageStatus::Received,
            scope.limit,
            scope.voice_message_id,
        )
        .await?;
        debug!(count = messages.len(), "Voice messages awaiting transcription");

        for message in &messages {
            match self.transcribe_one(message).await {
                Ok((outcome, detail)) => report.record(message.id, outcome, detail),
                Err(e) => {
                    warn!(voice_message_id = message.id, error = %e, "Transcription item failed");
                    report.failed(message.id, e);
                }
            }
        }

        Ok(report)
    }

    async fn transcribe_one(&self, message: &VoiceMessage) -> Result<(ItemOutcome, Option<String>)> {
        if !db::voice_messages::claim_for_transcription(&self.db, message.id).await? {
            return Ok((ItemOutcome::Skipped, Some("claimed elsewhere".to_string())));
        }

        let start = Instant::now();
        let transcript = match self.transcriber.transcribe(message).await {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(voice_message_id = message.id, error = %e, "Transcription failed");
                db::voice_messages::mark_failed(&self.db, message.id, &e.to_string()).await?;
                return Ok((ItemOutcome::Failed, Some(e.to_string())));
            }
        };
        let processing_time_ms = start.elapsed().as_millis() as i64;

        let record = TranscriptionRecord {
            text: &transcript.text,
            confidence: transcript.confidence,
            language: transcript.language.as_deref(),
            processing_time_ms,
            service_name: &transcript.service_name,
        };

        if db::transcriptions::complete_transcription(&self.db, message.id, &record).await? {
            info!(
                voice_message_id = message.id,
                chars = transcript.text.len(),
                confidence = ?transcript.confidence,
                processing_time_ms,
                "Voice message transcribed"
            );
            Ok((ItemOutcome::Succeeded, None))
        } else {
            Ok((ItemOutcome::Skipped, Some("claim lost before completion".to_string())))
        }
    }
}
