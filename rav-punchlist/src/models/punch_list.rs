//! Punch-list items and contractor assignments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

db_enum! {
    Priority {
        Urgent => "urgent",
        High => "high",
        Medium => "medium",
        Low => "low",
    }
}

impl Priority {
    /// Parse loosely; anything unrecognised is `Medium`
    pub fn parse_lenient(value: &str) -> Priority {
        match value.trim().to_ascii_lowercase().as_str() {
            "urgent" | "critical" | "emergency" | "asap" => Priority::Urgent,
            "high" | "important" => Priority::High,
            "low" | "minor" | "cosmetic" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

db_enum! {
    /// `extracted → assigned → completed`, with `pending` for items that
    /// found no candidate (or whose assignment was declined or undeliverable)
    /// and wait for the next assignment pass
    ItemStatus {
        Extracted => "extracted",
        Pending => "pending",
        Assigned => "assigned",
        Completed => "completed",
    }
}

db_enum! {
    AssignmentMethod {
        Algorithm => "algorithm",
        Manual => "manual",
    }
}

db_enum! {
    /// `undeliverable` is set by dispatch when the message could never be
    /// sent; like `declined` it frees the item for another contractor
    ContractorResponse {
        Pending => "pending",
        Accepted => "accepted",
        Declined => "declined",
        Undeliverable => "undeliverable",
        Completed => "completed",
    }
}

db_enum! {
    /// Outbound message state for an assignment
    DeliveryStatus {
        Queued => "queued",
        Sending => "sending",
        Sent => "sent",
        Failed => "failed",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunchListItem {
    pub id: i64,
    pub project_id: i64,
    pub voice_message_id: Option<i64>,
    pub description: String,
    pub room: Option<String>,
    pub trade_category: Option<String>,
    pub priority: Priority,
    pub estimated_hours: Option<f64>,
    pub status: ItemStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPunchListItem {
    pub project_id: i64,
    pub voice_message_id: Option<i64>,
    pub description: String,
    pub room: Option<String>,
    pub trade_category: Option<String>,
    pub priority: Priority,
    pub estimated_hours: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunchListAssignment {
    pub id: i64,
    pub punch_list_item_id: i64,
    pub contractor_id: i64,
    pub project_id: i64,
    pub assignment_method: AssignmentMethod,
    pub assignment_reason: Option<String>,
    pub score: Option<i64>,
    pub contractor_response: ContractorResponse,
    pub delivery_status: DeliveryStatus,
    pub message_sid: Option<String>,
    pub send_attempts: i64,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub reminder_count: i64,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub punch_list_item_id: i64,
    pub contractor_id: i64,
    pub project_id: i64,
    pub method: AssignmentMethod,
    pub reason: String,
    pub score: Option<i64>,
}
