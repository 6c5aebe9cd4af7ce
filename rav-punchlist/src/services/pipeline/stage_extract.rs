//! EXTRACT: transcripts → punch-list items

use rav_common::Result;
use tracing::{debug, info, warn};

use super::{ItemOutcome, PunchListPipeline, StageReport, StageScope, STAGE_EXTRACT};
use crate::db;
use crate::db::extraction_runs::ExtractionCandidate;
use crate::models::NewPunchListItem;
use crate::services::extraction::ExtractionContext;

impl PunchListPipeline {
    pub(super) async fn stage_extract(&self, scope: StageScope) -> Result<StageReport> {
        let mut report = StageReport::new(STAGE_EXTRACT);

        let released =
            db::extraction_runs::release_stale_claims(&self.db, self.settings.stale_claim_minutes)
                .await?;
        if released > 0 {
            info!(released, "Released stale extraction claims");
        }

        let candidates =
            db::extraction_runs::list_ready(&self.db, scope.limit, scope.voice_message_id).await?;
        debug!(count = candidates.len(), "Transcripts awaiting extraction");

        for candidate in &candidates {
            let id = candidate.message.id;
            match self.extract_one(candidate).await {
                Ok((outcome, detail)) => report.record(id, outcome, detail),
                Err(e) => {
                    warn!(voice_message_id = id, error = %e, "Extraction item failed");
                    report.failed(id, e);
                }
            }
        }

        Ok(report)
    }

    async fn extract_one(
        &self,
        candidate: &ExtractionCandidate,
    ) -> Result<(ItemOutcome, Option<String>)> {
        let message = &candidate.message;

        if !db::extraction_runs::claim(&self.db, message.id).await? {
            return Ok((ItemOutcome::Skipped, Some("claimed elsewhere".to_string())));
        }

        let Some(project_id) = message.project_id else {
            let error = "voice message has no project";
            warn!(voice_message_id = message.id, "{}", error);
            db::extraction_runs::mark_failed(&self.db, message.id, error).await?;
            return Ok((ItemOutcome::Failed, Some(error.to_string())));
        };

        let project_name = db::projects::get_project(&self.db, project_id)
            .await?
            .map(|p| p.name);
        let context = ExtractionContext {
            transcript: candidate.transcript.clone(),
            project_name,
        };

        let extracted = match self.extractor.extract(&context).await {
            Ok(items) => items,
            Err(e) if e.is_retryable() => {
                let retrying = db::extraction_runs::mark_retry_or_failed(
                    &self.db,
                    message.id,
                    &e.to_string(),
                    self.settings.max_extraction_attempts,
                )
                .await?;
                warn!(voice_message_id = message.id, error = %e, retrying, "Extraction failed");
                let detail = if retrying {
                    format!("{} (will retry)", e)
                } else {
                    format!("{} (attempts exhausted)", e)
                };
                return Ok((ItemOutcome::Failed, Some(detail)));
            }
            Err(e) => {
                warn!(voice_message_id = message.id, error = %e, "Extraction failed");
                db::extraction_runs::mark_failed(&self.db, message.id, &e.to_string()).await?;
                return Ok((ItemOutcome::Failed, Some(e.to_string())));
            }
        };

        let items: Vec<NewPunchListItem> = extracted
            .into_iter()
            .map(|item| item.into_new_item(project_id, message.id))
            .collect();

        match db::extraction_runs::complete_with_items(
            &self.db,
            message.id,
            &items,
            self.extractor.service_name(),
        )
        .await?
        {
            Some(ids) => {
                info!(
                    voice_message_id = message.id,
                    items = ids.len(),
                    service = self.extractor.service_name(),
                    "Extracted punch-list items"
                );
                Ok((ItemOutcome::Succeeded, Some(format!("{} items", ids.len()))))
            }
            None => Ok((ItemOutcome::Skipped, Some("claim lost before completion".to_string()))),
        }
    }
}
