//! Inbound contractor replies
//!
//! Recognises accept, decline and complete keywords and applies them to the
//! sender's open assignment. Anything unrecognised is logged and ignored;
//! it is never an error.

use rav_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::db;
use crate::models::ContractorResponse;

const ACCEPT_WORDS: &[&str] = &["accept", "accepted", "yes", "y", "ok", "okay", "confirm", "confirmed"];
const DECLINE_WORDS: &[&str] = &["decline", "declined", "reject", "rejected", "pass"];
/// Only a decline when nothing else in the reply is a keyword ("no problem, I accept")
const WEAK_DECLINE_WORDS: &[&str] = &["no", "n", "nope"];
const COMPLETE_WORDS: &[&str] = &["complete", "completed", "done", "finished"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyIntent {
    Accept,
    Decline,
    Complete,
}

impl ReplyIntent {
    pub fn target_response(self) -> ContractorResponse {
        match self {
            ReplyIntent::Accept => ContractorResponse::Accepted,
            ReplyIntent::Decline => ContractorResponse::Declined,
            ReplyIntent::Complete => ContractorResponse::Completed,
        }
    }

    /// Responses an assignment may be in for this reply to apply
    pub fn applies_from(self) -> &'static [ContractorResponse] {
        match self {
            ReplyIntent::Accept | ReplyIntent::Decline => &[ContractorResponse::Pending],
            ReplyIntent::Complete => &[ContractorResponse::Accepted, ContractorResponse::Pending],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedReply {
    pub intent: ReplyIntent,
    /// Assignment id quoted as `#123`
    pub reference: Option<i64>,
}

fn reference_in(text: &str) -> Option<i64> {
    let start = text.find('#')?;
    let digits: String = text[start + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Classify a reply by the keyword families it contains
///
/// Precedence is COMPLETE, then DECLINE, then ACCEPT, so "yes, all done"
/// completes and "ok but I have to pass" declines. A bare "no" declines only
/// when the reply holds no other keyword.
pub fn parse_reply(text: &str) -> Option<ParsedReply> {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has = |family: &[&str]| words.iter().any(|w| family.contains(w));

    let intent = if has(COMPLETE_WORDS) {
        ReplyIntent::Complete
    } else if has(DECLINE_WORDS) {
        ReplyIntent::Decline
    } else if has(ACCEPT_WORDS) {
        ReplyIntent::Accept
    } else if has(WEAK_DECLINE_WORDS) {
        ReplyIntent::Decline
    } else {
        return None;
    };

    Some(ParsedReply {
        intent,
        reference: reference_in(&lowered),
    })
}

/// State change made by a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyUpdate {
    pub assignment_id: i64,
    pub contractor_id: i64,
    pub new_status: ContractorResponse,
}

/// Parse `body` from `from_phone` and apply it
///
/// Returns `None` when nothing changed: unknown keyword, unknown sender, or
/// no open assignment to apply it to.
pub async fn handle_reply(pool: &SqlitePool, from_phone: &str, body: &str) -> Result<Option<ReplyUpdate>> {
    let Some(parsed) = parse_reply(body) else {
        info!(from = %from_phone, "Inbound reply has no recognised keyword, ignoring");
        return Ok(None);
    };

    let Some(phone) = rav_common::phone::normalize(from_phone) else {
        info!(from = %from_phone, "Inbound reply without a usable phone number, ignoring");
        return Ok(None);
    };

    let Some(contractor) = db::contractors::find_by_phone(pool, &phone).await? else {
        info!(phone = %phone, "Reply from unknown number, ignoring");
        return Ok(None);
    };

    let open =
        db::assignments::list_open_for_contractor(pool, contractor.id, parsed.intent.applies_from())
            .await?;

    let target = parsed
        .reference
        .and_then(|reference| open.iter().find(|a| a.id == reference))
        .or_else(|| open.first());

    let Some(assignment) = target else {
        info!(
            contractor_id = contractor.id,
            intent = ?parsed.intent,
            "No open assignment for reply, ignoring"
        );
        return Ok(None);
    };

    let new_status = parsed.intent.target_response();
    let applied = db::assignments::apply_response(
        pool,
        assignment.id,
        parsed.intent.applies_from(),
        new_status,
    )
    .await?;

    if !applied {
        info!(assignment_id = assignment.id, "Assignment changed before reply applied, ignoring");
        return Ok(None);
    }

    info!(
        assignment_id = assignment.id,
        contractor_id = contractor.id,
        response = %new_status,
        "Applied contractor reply"
    );

    Ok(Some(ReplyUpdate {
        assignment_id: assignment.id,
        contractor_id: contractor.id,
        new_status,
    }))
}
