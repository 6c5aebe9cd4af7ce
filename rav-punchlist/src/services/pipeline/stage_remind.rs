//! REMIND: re-send to contractors who have not answered

use rav_common::time::to_db_string;
use rav_common::Result;
use tracing::{debug, info, warn};

use super::{ItemOutcome, PunchListPipeline, StageReport, STAGE_REMIND};
use crate::db;
use crate::models::PunchListAssignment;
use crate::services::messaging;

impl PunchListPipeline {
    pub(super) async fn stage_remind(&self, limit: u32) -> Result<StageReport> {
        let mut report = StageReport::new(STAGE_REMIND);

        if !self.gateway.is_configured() {
            report.note = Some("message gateway not configured".to_string());
            return Ok(report);
        }

        let due_before = to_db_string(
            chrono::Utc::now() - chrono::Duration::hours(self.settings.reminder_after_hours),
        );
        let due = db::assignments::list_reminder_due(
            &self.db,
            limit,
            &due_before,
            self.settings.max_reminders,
        )
        .await?;
        debug!(count = due.len(), "Assignments due a reminder");

        for assignment in &due {
            match self.remind_one(assignment).await {
                Ok((outcome, detail)) => report.record(assignment.id, outcome, detail),
                Err(e) => {
                    warn!(assignment_id = assignment.id, error = %e, "Reminder item failed");
                    report.failed(assignment.id, e);
                }
            }
        }

        Ok(report)
    }

    async fn remind_one(
        &self,
        assignment: &PunchListAssignment,
    ) -> Result<(ItemOutcome, Option<String>)> {
        let observed = assignment.reminder_count;
        if !db::assignments::claim_reminder(&self.db, assignment.id, observed).await? {
            return Ok((ItemOutcome::Skipped, Some("claimed elsewhere".to_string())));
        }
        let previous_reminder_at = assignment.last_reminder_at.map(to_db_string);

        let outcome = self.send_reminder(assignment, observed + 1).await;
        if let Err(e) = &outcome {
            warn!(assignment_id = assignment.id, error = %e, "Reminder send failed, restoring count");
            db::assignments::revert_reminder(
                &self.db,
                assignment.id,
                observed,
                previous_reminder_at.as_deref(),
            )
            .await?;
        }

        match outcome {
            Ok(()) => {
                info!(assignment_id = assignment.id, reminder = observed + 1, "Reminder sent");
                Ok((ItemOutcome::Succeeded, Some(format!("reminder {}", observed + 1))))
            }
            Err(e) => Ok((ItemOutcome::Failed, Some(e))),
        }
    }

    async fn send_reminder(
        &self,
        assignment: &PunchListAssignment,
        reminder_number: i64,
    ) -> std::result::Result<(), String> {
        let parts = self
            .load_message_parts(assignment)
            .await
            .map_err(|e| e.to_string())?;
        let phone = parts
            .contractor
            .phone
            .clone()
            .ok_or_else(|| format!("contractor {} has no phone number", parts.contractor.id))?;
        let body = messaging::render_reminder_message(&parts.context(assignment.id), reminder_number);
        self.gateway
            .send(&phone, &body)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
