//! Contractor records

use serde::{Deserialize, Serialize};

db_enum! {
    Availability {
        Available => "available",
        Busy2Weeks => "busy_2_weeks",
        BusyMonth => "busy_month",
        Unavailable => "unavailable",
    }
}

db_enum! {
    PriceRange {
        Budget => "budget",
        MidRange => "mid-range",
        Premium => "premium",
    }
}

impl PriceRange {
    /// Accept the spellings seen in contractor profiles; unknown is `None`
    pub fn parse_lenient(value: &str) -> Option<PriceRange> {
        let normalized: String = value
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        match normalized.as_str() {
            "budget" | "economy" => Some(PriceRange::Budget),
            "midrange" | "mid" | "moderate" => Some(PriceRange::MidRange),
            "premium" | "luxury" | "highend" => Some(PriceRange::Premium),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contractor {
    pub id: i64,
    pub business_name: String,
    pub phone: Option<String>,
    pub specialties: Vec<String>,
    pub service_areas: Vec<String>,
    pub price_range: Option<PriceRange>,
    pub availability_status: Availability,
    /// 0–5; missing ratings score as 0
    pub rating: Option<f64>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewContractor {
    pub business_name: String,
    pub phone: Option<String>,
    pub specialties: Vec<String>,
    pub service_areas: Vec<String>,
    pub price_range: Option<PriceRange>,
    pub availability_status: Availability,
    pub rating: Option<f64>,
    pub is_active: bool,
}
