//! Contractor match scoring
//!
//! Weighted sum used to rank candidates for one punch-list item:
//! - **Rating**: `rating × 20` (0–100), missing rating counts as 0
//! - **Availability**: available +25, busy 2 weeks +15, busy month +5
//! - **Budget tier**: contractor price range against the project budget,
//!   0–25 from a fixed table
//! - **Urgency**: +10 when the project timeline is `asap` and the
//!   contractor is available now
//!
//! Scores are only comparable within one candidate set.

use serde::Serialize;

use crate::models::{Availability, Contractor, PriceRange};

/// Project budget brackets the tier table knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BudgetRange {
    #[serde(rename = "25k-50k")]
    From25kTo50k,
    #[serde(rename = "50k-100k")]
    From50kTo100k,
    #[serde(rename = "100k-250k")]
    From100kTo250k,
    #[serde(rename = "250k+")]
    Over250k,
}

impl BudgetRange {
    /// Parse the budget strings projects carry
    ///
    /// Accepts `25k-50k`, `$25,000 - $50,000`, `25-50k`, `25k_50k`, `250k+`,
    /// `over 250k`. Anything else is `None`.
    pub fn parse(raw: &str) -> Option<BudgetRange> {
        let text = raw.trim().to_ascii_lowercase();
        let open_ended = text.ends_with('+') || text.contains("over") || text.contains("plus");

        let bounds = thousands_in(&text);
        match (bounds.as_slice(), open_ended) {
            ([250], true) => Some(BudgetRange::Over250k),
            ([low, high], false) => match (*low, *high) {
                (25, 50) => Some(BudgetRange::From25kTo50k),
                (50, 100) => Some(BudgetRange::From50kTo100k),
                (100, 250) => Some(BudgetRange::From100kTo250k),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Numbers in `text`, expressed in thousands
///
/// `25k` and `25000` both read as 25. A bare number below 1000 followed later
/// by a `k`-suffixed one (`25-50k`) borrows the suffix.
fn thousands_in(text: &str) -> Vec<u64> {
    let mut values: Vec<(u64, bool)> = Vec::new();
    let mut digits = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if c == ',' && !digits.is_empty() {
            continue;
        }
        if !digits.is_empty() {
            let suffixed = c == 'k';
            if let Ok(n) = digits.parse::<u64>() {
                values.push((n, suffixed));
            }
            digits.clear();
        }
    }
    if let Ok(n) = digits.parse::<u64>() {
        values.push((n, false));
    }

    let any_suffixed = values.iter().any(|(_, k)| *k);
    values
        .into_iter()
        .map(|(n, suffixed)| {
            if suffixed || (any_suffixed && n < 1000) {
                n
            } else {
                n / 1000
            }
        })
        .collect()
}

/// Bonus for a contractor price tier against a project budget bracket
pub fn budget_tier_bonus(price_range: Option<PriceRange>, budget: Option<BudgetRange>) -> i64 {
    use BudgetRange::*;

    match (price_range, budget) {
        (Some(PriceRange::Budget), Some(From25kTo50k)) => 20,
        (Some(PriceRange::Budget), Some(From50kTo100k)) => 10,
        (Some(PriceRange::MidRange), Some(From50kTo100k)) => 20,
        (Some(PriceRange::MidRange), Some(From100kTo250k)) => 15,
        (Some(PriceRange::MidRange), Some(From25kTo50k)) => 10,
        (Some(PriceRange::Premium), Some(From100kTo250k)) => 20,
        (Some(PriceRange::Premium), Some(Over250k)) => 25,
        _ => 0,
    }
}

pub fn availability_bonus(availability: Availability) -> i64 {
    match availability {
        Availability::Available => 25,
        Availability::Busy2Weeks => 15,
        Availability::BusyMonth => 5,
        Availability::Unavailable => 0,
    }
}

/// Project context a contractor is scored against
#[derive(Debug, Clone, Default)]
pub struct ScoreRequest<'a> {
    pub budget_range: Option<&'a str>,
    pub timeline: Option<&'a str>,
}

/// Per-factor contributions to a contractor's score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub rating_points: i64,
    pub availability_bonus: i64,
    pub budget_bonus: i64,
    pub urgency_bonus: i64,
    pub total: i64,
}

pub fn score(contractor: &Contractor, request: &ScoreRequest<'_>) -> ScoreBreakdown {
    let rating = contractor
        .rating
        .filter(|r| r.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 5.0);
    let rating_points = (rating * 20.0).round() as i64;

    let availability_bonus = availability_bonus(contractor.availability_status);

    let budget = request.budget_range.and_then(BudgetRange::parse);
    let budget_bonus = budget_tier_bonus(contractor.price_range, budget);

    let asap = request
        .timeline
        .map(|t| t.trim().eq_ignore_ascii_case("asap"))
        .unwrap_or(false);
    let urgency_bonus = if asap && contractor.availability_status == Availability::Available {
        10
    } else {
        0
    };

    ScoreBreakdown {
        rating_points,
        availability_bonus,
        budget_bonus,
        urgency_bonus,
        total: rating_points + availability_bonus + budget_bonus + urgency_bonus,
    }
}

impl ScoreBreakdown {
    /// Human-readable summary, largest contributions first
    pub fn reason(&self, contractor: &Contractor) -> String {
        let mut factors: Vec<(i64, String)> = Vec::new();

        if self.rating_points > 0 {
            let rating = contractor.rating.unwrap_or(0.0);
            factors.push((self.rating_points, format!("rating {:.1} (+{})", rating, self.rating_points)));
        }
        if self.availability_bonus > 0 {
            factors.push((
                self.availability_bonus,
                format!("{} (+{})", contractor.availability_status, self.availability_bonus),
            ));
        }
        if self.budget_bonus > 0 {
            let tier = contractor.price_range.map(|p| p.as_str()).unwrap_or("unknown");
            factors.push((self.budget_bonus, format!("{} price tier fit (+{})", tier, self.budget_bonus)));
        }
        if self.urgency_bonus > 0 {
            factors.push((self.urgency_bonus, format!("available for asap timeline (+{})", self.urgency_bonus)));
        }

        factors.sort_by(|a, b| b.0.cmp(&a.0));

        if factors.is_empty() {
            format!("{} scored {}: no scoring factors", contractor.business_name, self.total)
        } else {
            let parts: Vec<String> = factors.into_iter().map(|(_, text)| text).collect();
            format!("{} scored {}: {}", contractor.business_name, self.total, parts.join(", "))
        }
    }
}

/// A contractor paired with its score
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub contractor: Contractor,
    pub breakdown: ScoreBreakdown,
}

/// Score every candidate and sort by descending total
///
/// The sort is stable: equal scores keep their input order.
pub fn rank(candidates: Vec<Contractor>, request: &ScoreRequest<'_>) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .map(|contractor| {
            let breakdown = score(&contractor, request);
            RankedCandidate { contractor, breakdown }
        })
        .collect();
    ranked.sort_by(|a, b| b.breakdown.total.cmp(&a.breakdown.total));
    ranked
}
