//! ASSIGN: unassigned items → pending contractor assignments

use rav_common::Result;
use tracing::{debug, warn};

use super::{PunchListPipeline, StageReport, StageScope, STAGE_ASSIGN};
use crate::db;
use crate::services::assignment::{self, AssignOutcome};

impl PunchListPipeline {
    pub(super) async fn stage_assign(&self, scope: StageScope) -> Result<StageReport> {
        let mut report = StageReport::new(STAGE_ASSIGN);

        let items = db::items::list_assignable(&self.db, scope.limit, scope.voice_message_id).await?;
        debug!(count = items.len(), "Items awaiting assignment");

        for item in &items {
            match assignment::assign_item(&self.db, item).await {
                Ok(AssignOutcome::Assigned {
                    assignment_id,
                    contractor_id,
                    score,
                }) => report.succeeded(
                    item.id,
                    Some(format!(
                        "assignment {} to contractor {} (score {})",
                        assignment_id, contractor_id, score
                    )),
                ),
                Ok(AssignOutcome::NoCandidate) => {
                    debug!(item_id = item.id, trade = ?item.trade_category, "No eligible contractor");
                    report.skipped(item.id, "no eligible contractor");
                }
                Ok(AssignOutcome::AlreadyAssigned) => {
                    report.skipped(item.id, "already has an active assignment")
                }
                Err(e) => {
                    warn!(item_id = item.id, error = %e, "Assignment item failed");
                    report.failed(item.id, e);
                }
            }
        }

        Ok(report)
    }
}
