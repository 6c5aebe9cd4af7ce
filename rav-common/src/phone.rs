//! Phone number normalization
//!
//! Inbound gateways deliver numbers in several shapes (`whatsapp:+1 555-0100`,
//! `15550100`, `+1 (555) 0100`). Everything stored or compared goes through
//! [`normalize`] first.

/// Normalize a phone number to `+<digits>` form
///
/// Strips a `whatsapp:` channel prefix and all formatting characters.
/// Returns `None` when no digits remain.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_channel = trimmed
        .strip_prefix("whatsapp:")
        .or_else(|| trimmed.strip_prefix("WHATSAPP:"))
        .unwrap_or(trimmed);

    let digits: String = without_channel.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    Some(format!("+{}", digits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_whatsapp_prefix() {
        assert_eq!(normalize("whatsapp:+15550100").as_deref(), Some("+15550100"));
    }

    #[test]
    fn test_strips_formatting() {
        assert_eq!(normalize(" +1 (555) 010-0 ").as_deref(), Some("+15550100"));
        assert_eq!(normalize("15550100").as_deref(), Some("+15550100"));
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("whatsapp:"), None);
    }
}
