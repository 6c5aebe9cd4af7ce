//! Canonical trade categories and the vocabulary that maps onto them

/// Trade categories items and contractor specialties are normalised to
pub const TRADE_CATEGORIES: &[&str] = &[
    "plumber",
    "electrician",
    "carpenter",
    "painter",
    "hvac",
    "roofer",
    "flooring",
    "tile",
    "drywall",
    "landscaper",
    "appliance",
    "handyman",
    "general_contractor",
];

/// Names people use for a trade, keyed to the canonical category
const TRADE_SYNONYMS: &[(&str, &str)] = &[
    ("plumbing", "plumber"),
    ("plumbers", "plumber"),
    ("electrical", "electrician"),
    ("electric", "electrician"),
    ("electricians", "electrician"),
    ("carpentry", "carpenter"),
    ("woodwork", "carpenter"),
    ("cabinetry", "carpenter"),
    ("painting", "painter"),
    ("paint", "painter"),
    ("heating", "hvac"),
    ("cooling", "hvac"),
    ("air_conditioning", "hvac"),
    ("roofing", "roofer"),
    ("roof", "roofer"),
    ("floors", "flooring"),
    ("floor", "flooring"),
    ("tiling", "tile"),
    ("tiler", "tile"),
    ("sheetrock", "drywall"),
    ("plaster", "drywall"),
    ("landscaping", "landscaper"),
    ("yard", "landscaper"),
    ("appliances", "appliance"),
    ("appliance_repair", "appliance"),
    ("general", "general_contractor"),
    ("gc", "general_contractor"),
    ("contractor", "general_contractor"),
    ("general_contracting", "general_contractor"),
    ("handy_man", "handyman"),
    ("maintenance", "handyman"),
];

/// Words in a task description that point at a trade, checked in order
const TRADE_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "plumber",
        &[
            "toilet", "leak", "leaking", "faucet", "pipe", "pipes", "drain", "sink", "wax ring",
            "shower", "water heater", "clog", "clogged",
        ],
    ),
    (
        "electrician",
        &[
            "outlet", "outlets", "switch", "wiring", "breaker", "light fixture", "electrical",
            "gfci", "socket",
        ],
    ),
    ("hvac", &["furnace", "thermostat", "vent", "duct", "air conditioner", "ac unit", "heat pump"]),
    ("roofer", &["roof", "shingle", "shingles", "gutter", "gutters", "flashing"]),
    ("painter", &["paint", "painting", "repaint", "touch up", "touch-up", "primer"]),
    ("tile", &["tile", "tiles", "grout", "backsplash"]),
    ("flooring", &["floor", "floors", "flooring", "hardwood", "laminate", "carpet", "baseboard"]),
    ("drywall", &["drywall", "sheetrock", "patch", "hole in the wall", "crack in the wall"]),
    (
        "carpenter",
        &["cabinet", "cabinets", "door", "doors", "trim", "shelf", "shelves", "deck", "railing"],
    ),
    ("appliance", &["dishwasher", "fridge", "refrigerator", "oven", "stove", "washer", "dryer"]),
    ("landscaper", &["lawn", "garden", "yard", "tree", "hedge", "sod"]),
];

/// Map any spelling of a trade onto its canonical category
pub fn normalize_trade(raw: &str) -> Option<&'static str> {
    let key: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();

    if let Some(canonical) = TRADE_CATEGORIES.iter().find(|t| **t == key) {
        return Some(canonical);
    }
    TRADE_SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == key)
        .map(|(_, canonical)| *canonical)
}

/// Guess a trade from free text
pub fn infer_trade(text: &str) -> Option<&'static str> {
    let lowered = text.to_ascii_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .collect();

    TRADE_KEYWORDS.iter().find_map(|(trade, keywords)| {
        let hit = keywords.iter().any(|kw| {
            if kw.contains(' ') {
                lowered.contains(kw)
            } else {
                words.contains(kw)
            }
        });
        hit.then_some(*trade)
    })
}

/// True when any contractor specialty normalises to the item's trade
///
/// Handymen and general contractors are not treated as wildcards; they
/// match only items categorised as their own trade.
pub fn specialty_matches(specialties: &[String], trade: &str) -> bool {
    let Some(wanted) = normalize_trade(trade) else {
        return false;
    };
    specialties
        .iter()
        .filter_map(|s| normalize_trade(s))
        .any(|s| s == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trade() {
        assert_eq!(normalize_trade("Plumbing"), Some("plumber"));
        assert_eq!(normalize_trade("plumber"), Some("plumber"));
        assert_eq!(normalize_trade("General Contractor"), Some("general_contractor"));
        assert_eq!(normalize_trade("air-conditioning"), Some("hvac"));
        assert_eq!(normalize_trade("astrologer"), None);
    }

    #[test]
    fn test_infer_trade_from_description() {
        assert_eq!(
            infer_trade("toilet is leaking, needs new wax ring"),
            Some("plumber")
        );
        assert_eq!(infer_trade("Replace the GFCI outlet by the sink"), Some("plumber"));
        assert_eq!(infer_trade("replace the GFCI outlet"), Some("electrician"));
        assert_eq!(infer_trade("touch up paint in hallway"), Some("painter"));
        assert_eq!(infer_trade("nothing relevant here"), None);
    }

    #[test]
    fn test_specialty_matches() {
        let specialties = vec!["Plumbing".to_string(), "tile".to_string()];
        assert!(specialty_matches(&specialties, "plumber"));
        assert!(specialty_matches(&specialties, "tiling"));
        assert!(!specialty_matches(&specialties, "electrician"));
        assert!(!specialty_matches(&specialties, "unknown trade"));
    }
}
