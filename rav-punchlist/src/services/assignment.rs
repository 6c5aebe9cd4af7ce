//! Assignment selection
//!
//! Filters active contractors down to those who do the item's trade in the
//! project's city, ranks them with the scorer and records an assignment for
//! the winner. The database's one-active-assignment index is the final
//! arbiter when two passes race on the same item.

use rav_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db;
use crate::models::{AssignmentMethod, Contractor, NewAssignment, Project, PunchListItem};
use crate::services::scorer::{self, RankedCandidate, ScoreRequest};
use crate::services::trades;

/// Result of one automatic assignment attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned {
        assignment_id: i64,
        contractor_id: i64,
        score: i64,
    },
    /// No contractor passed the filter; the item waits in `pending`
    NoCandidate,
    /// Another pass already holds an active assignment for this item
    AlreadyAssigned,
}

/// Result of a manual assignment request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualAssignOutcome {
    Assigned { assignment_id: i64 },
    AlreadyAssigned,
}

/// Ranked candidate as shown on review surfaces
#[derive(Debug, Clone, Serialize)]
pub struct CandidateView {
    pub contractor_id: i64,
    pub business_name: String,
    pub score: i64,
    pub breakdown: scorer::ScoreBreakdown,
    pub reason: String,
}

impl From<&RankedCandidate> for CandidateView {
    fn from(ranked: &RankedCandidate) -> Self {
        CandidateView {
            contractor_id: ranked.contractor.id,
            business_name: ranked.contractor.business_name.clone(),
            score: ranked.breakdown.total,
            breakdown: ranked.breakdown,
            reason: ranked.breakdown.reason(&ranked.contractor),
        }
    }
}

fn serves_city(service_areas: &[String], city: &str) -> bool {
    let city = city.trim();
    // "Austin, TX" matches a service area of "Austin"
    let city_name = city.split(',').next().unwrap_or(city).trim();
    service_areas.iter().any(|area| {
        let area = area.trim();
        area.eq_ignore_ascii_case(city) || area.eq_ignore_ascii_case(city_name)
    })
}

/// Pre-filter applied before scoring
pub fn is_eligible(
    contractor: &Contractor,
    item: &PunchListItem,
    project: &Project,
    passed_over: &[i64],
) -> bool {
    if !contractor.is_active || passed_over.contains(&contractor.id) {
        return false;
    }
    let Some(trade) = item.trade_category.as_deref() else {
        return false;
    };
    let Some(city) = project.city.as_deref() else {
        return false;
    };
    trades::specialty_matches(&contractor.specialties, trade)
        && serves_city(&contractor.service_areas, city)
}

async fn load_project(pool: &SqlitePool, item: &PunchListItem) -> Result<Project> {
    db::projects::get_project(pool, item.project_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Project {} for item {}", item.project_id, item.id)))
}

/// Every eligible contractor for `item`, best first
pub async fn rank_candidates(pool: &SqlitePool, item: &PunchListItem) -> Result<Vec<RankedCandidate>> {
    let project = load_project(pool, item).await?;
    let passed_over = db::assignments::passed_over_contractor_ids(pool, item.id).await?;

    let eligible: Vec<Contractor> = db::contractors::list_active(pool)
        .await?
        .into_iter()
        .filter(|c| is_eligible(c, item, &project, &passed_over))
        .collect();

    debug!(
        item_id = item.id,
        eligible = eligible.len(),
        passed_over = passed_over.len(),
        "Filtered contractor candidates"
    );

    let request = ScoreRequest {
        budget_range: project.budget_range.as_deref(),
        timeline: project.timeline.as_deref(),
    };
    Ok(scorer::rank(eligible, &request))
}

/// Top `limit` candidates for manual review
pub async fn top_candidates(
    pool: &SqlitePool,
    item: &PunchListItem,
    limit: usize,
) -> Result<Vec<CandidateView>> {
    let ranked = rank_candidates(pool, item).await?;
    Ok(ranked.iter().take(limit).map(CandidateView::from).collect())
}

/// Pick the best candidate for `item` and record the assignment
pub async fn assign_item(pool: &SqlitePool, item: &PunchListItem) -> Result<AssignOutcome> {
    let ranked = rank_candidates(pool, item).await?;

    let Some(best) = ranked.first() else {
        db::items::mark_pending(pool, item.id).await?;
        return Ok(AssignOutcome::NoCandidate);
    };

    let new = NewAssignment {
        punch_list_item_id: item.id,
        contractor_id: best.contractor.id,
        project_id: item.project_id,
        method: AssignmentMethod::Algorithm,
        reason: best.breakdown.reason(&best.contractor),
        score: Some(best.breakdown.total),
    };

    match db::assignments::insert_assignment(pool, &new).await? {
        Some(assignment_id) => {
            info!(
                item_id = item.id,
                assignment_id,
                contractor_id = best.contractor.id,
                score = best.breakdown.total,
                "Assigned punch-list item"
            );
            Ok(AssignOutcome::Assigned {
                assignment_id,
                contractor_id: best.contractor.id,
                score: best.breakdown.total,
            })
        }
        None => {
            db::items::mark_assigned(pool, item.id).await?;
            Ok(AssignOutcome::AlreadyAssigned)
        }
    }
}

/// Assign a specific contractor on an operator's behalf
///
/// Skips the eligibility filter but still refuses inactive contractors and
/// completed items.
pub async fn assign_manually(
    pool: &SqlitePool,
    item_id: i64,
    contractor_id: i64,
    reason: Option<&str>,
) -> Result<ManualAssignOutcome> {
    let item = db::items::get_item(pool, item_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Punch list item {}", item_id)))?;
    if item.status == crate::models::ItemStatus::Completed {
        return Err(Error::InvalidInput(format!("Item {} is already completed", item_id)));
    }

    let contractor = db::contractors::get_contractor(pool, contractor_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Contractor {}", contractor_id)))?;
    if !contractor.is_active {
        return Err(Error::InvalidInput(format!("Contractor {} is not active", contractor_id)));
    }

    let project = load_project(pool, &item).await?;
    let breakdown = scorer::score(
        &contractor,
        &ScoreRequest {
            budget_range: project.budget_range.as_deref(),
            timeline: project.timeline.as_deref(),
        },
    );

    let reason = match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) => r.to_string(),
        None => format!("Manually assigned to {}", contractor.business_name),
    };

    let new = NewAssignment {
        punch_list_item_id: item.id,
        contractor_id,
        project_id: item.project_id,
        method: AssignmentMethod::Manual,
        reason,
        score: Some(breakdown.total),
    };

    match db::assignments::insert_assignment(pool, &new).await? {
        Some(assignment_id) => {
            info!(item_id, assignment_id, contractor_id, "Manual assignment recorded");
            Ok(ManualAssignOutcome::Assigned { assignment_id })
        }
        None => Ok(ManualAssignOutcome::AlreadyAssigned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Availability, ItemStatus, Priority};

    fn item(trade: Option<&str>) -> PunchListItem {
        let now = chrono::Utc::now();
        PunchListItem {
            id: 7,
            project_id: 1,
            voice_message_id: None,
            description: "Fix leaking toilet".to_string(),
            room: Some("bathroom".to_string()),
            trade_category: trade.map(str::to_string),
            priority: Priority::High,
            estimated_hours: Some(2.0),
            status: ItemStatus::Extracted,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn project(city: Option<&str>) -> Project {
        Project {
            id: 1,
            name: "Kitchen + bath".to_string(),
            homeowner_id: None,
            homeowner_phone: None,
            city: city.map(str::to_string),
            budget_range: Some("50k-100k".to_string()),
            timeline: Some("asap".to_string()),
            status: "active".to_string(),
        }
    }

    fn plumber(id: i64) -> Contractor {
        Contractor {
            id,
            business_name: format!("Plumber {}", id),
            phone: Some("+15125550100".to_string()),
            specialties: vec!["Plumbing".to_string()],
            service_areas: vec!["austin".to_string()],
            price_range: None,
            availability_status: Availability::Available,
            rating: Some(4.0),
            is_active: true,
        }
    }

    #[test]
    fn test_eligible_plumber_in_city() {
        assert!(is_eligible(&plumber(1), &item(Some("plumber")), &project(Some("Austin, TX")), &[]));
    }

    #[test]
    fn test_ineligible_cases() {
        let p = project(Some("Austin"));
        assert!(!is_eligible(&plumber(1), &item(Some("electrician")), &p, &[]));
        assert!(!is_eligible(&plumber(1), &item(None), &p, &[]));
        assert!(!is_eligible(&plumber(1), &item(Some("plumber")), &project(Some("Dallas")), &[]));
        assert!(!is_eligible(&plumber(1), &item(Some("plumber")), &project(None), &[]));
        assert!(!is_eligible(&plumber(1), &item(Some("plumber")), &p, &[1]));

        let mut inactive = plumber(2);
        inactive.is_active = false;
        assert!(!is_eligible(&inactive, &item(Some("plumber")), &p, &[]));
    }
}
