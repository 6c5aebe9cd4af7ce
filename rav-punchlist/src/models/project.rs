//! Renovation projects (read-only context for the pipeline)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub homeowner_id: Option<String>,
    pub homeowner_phone: Option<String>,
    pub city: Option<String>,
    /// e.g. `25k-50k`, `250k+`
    pub budget_range: Option<String>,
    /// e.g. `asap`, `1-3 months`
    pub timeline: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub homeowner_id: Option<String>,
    pub homeowner_phone: Option<String>,
    pub city: Option<String>,
    pub budget_range: Option<String>,
    pub timeline: Option<String>,
}
