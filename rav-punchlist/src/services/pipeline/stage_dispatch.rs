//! DISPATCH: queued assignments → outbound contractor messages

use rav_common::{Error, Result};
use tracing::{debug, info, warn};

use super::{ItemOutcome, PunchListPipeline, StageReport, StageScope, STAGE_DISPATCH};
use crate::db;
use crate::models::{Contractor, Project, PunchListAssignment, PunchListItem};
use crate::services::messaging::{self, MessageContext};

/// Rows needed to render a message for one assignment
pub(super) struct MessageParts {
    pub item: PunchListItem,
    pub contractor: Contractor,
    pub project: Project,
}

impl MessageParts {
    pub fn context(&self, assignment_id: i64) -> MessageContext<'_> {
        MessageContext {
            assignment_id,
            contractor_name: &self.contractor.business_name,
            project_name: &self.project.name,
            city: self.project.city.as_deref(),
            description: &self.item.description,
            room: self.item.room.as_deref(),
            priority: self.item.priority,
            estimated_hours: self.item.estimated_hours,
        }
    }
}

impl PunchListPipeline {
    pub(super) async fn load_message_parts(
        &self,
        assignment: &PunchListAssignment,
    ) -> Result<MessageParts> {
        let item = db::items::get_item(&self.db, assignment.punch_list_item_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Item {}", assignment.punch_list_item_id)))?;
        let contractor = db::contractors::get_contractor(&self.db, assignment.contractor_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Contractor {}", assignment.contractor_id)))?;
        let project = db::projects::get_project(&self.db, assignment.project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Project {}", assignment.project_id)))?;
        Ok(MessageParts {
            item,
            contractor,
            project,
        })
    }

    pub(super) async fn stage_dispatch(&self, scope: StageScope) -> Result<StageReport> {
        let mut report = StageReport::new(STAGE_DISPATCH);

        if !self.gateway.is_configured() {
            warn!("Message gateway not configured, leaving assignments queued");
            report.note = Some("message gateway not configured".to_string());
            return Ok(report);
        }

        let released =
            db::assignments::release_stale_claims(&self.db, self.settings.stale_claim_minutes).await?;
        if released > 0 {
            info!(released, "Released stale dispatch claims");
        }

        let assignments =
            db::assignments::list_dispatchable(&self.db, scope.limit, scope.voice_message_id).await?;
        debug!(count = assignments.len(), "Assignments awaiting dispatch");

        for assignment in &assignments {
            match self.dispatch_one(assignment).await {
                Ok((outcome, detail)) => report.record(assignment.id, outcome, detail),
                Err(e) => {
                    warn!(assignment_id = assignment.id, error = %e, "Dispatch item failed");
                    report.failed(assignment.id, e);
                }
            }
        }

        Ok(report)
    }

    async fn dispatch_one(
        &self,
        assignment: &PunchListAssignment,
    ) -> Result<(ItemOutcome, Option<String>)> {
        if !db::assignments::claim_for_dispatch(&self.db, assignment.id).await? {
            return Ok((ItemOutcome::Skipped, Some("claimed elsewhere".to_string())));
        }

        let parts = match self.load_message_parts(assignment).await {
            Ok(parts) => parts,
            Err(e) => {
                db::assignments::mark_undeliverable(&self.db, assignment.id, &e.to_string()).await?;
                return Ok((ItemOutcome::Failed, Some(e.to_string())));
            }
        };

        let Some(phone) = parts.contractor.phone.clone() else {
            let error = format!("contractor {} has no phone number", parts.contractor.id);
            db::assignments::mark_undeliverable(&self.db, assignment.id, &error).await?;
            return Ok((ItemOutcome::Failed, Some(error)));
        };

        let body = messaging::render_assignment_message(&parts.context(assignment.id));

        match self.gateway.send(&phone, &body).await {
            Ok(receipt) => {
                db::assignments::mark_sent(&self.db, assignment.id, receipt.message_sid.as_deref())
                    .await?;
                info!(
                    assignment_id = assignment.id,
                    contractor_id = parts.contractor.id,
                    priority = %parts.item.priority,
                    message_sid = ?receipt.message_sid,
                    "Assignment message sent"
                );
                Ok((ItemOutcome::Succeeded, receipt.message_sid))
            }
            Err(e) if e.is_permanent() => {
                warn!(assignment_id = assignment.id, error = %e, "Assignment undeliverable");
                db::assignments::mark_undeliverable(&self.db, assignment.id, &e.to_string()).await?;
                Ok((ItemOutcome::Failed, Some(e.to_string())))
            }
            Err(e) => {
                let status = db::assignments::mark_send_failed(
                    &self.db,
                    assignment.id,
                    &e.to_string(),
                    self.settings.max_send_attempts,
                )
                .await?;
                warn!(
                    assignment_id = assignment.id,
                    error = %e,
                    delivery_status = %status,
                    "Assignment send failed"
                );
                Ok((ItemOutcome::Failed, Some(format!("{} (now {})", e, status))))
            }
        }
    }
}
