//! Participant address handling shared by the turn rules.

/// Placeholder recorded for participants that are bots or could not be mapped to a person.
pub const BOT_PLACEHOLDER: &str = "bot";

/// Lower-case and trim an email address.
pub fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Returns true for addresses that must never enter a turn document.
pub fn is_placeholder(email: &str) -> bool {
    let email = email.trim();
    email.is_empty() || email.eq_ignore_ascii_case(BOT_PLACEHOLDER)
}
