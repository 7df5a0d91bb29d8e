//! Recipient address normalisation per channel.
//!
//! Phone channels use E.164; Telegram uses numeric chat IDs learned during
//! onboarding; Messenger uses page-scoped IDs (PSIDs) issued by Meta.

use courier_core::{Channel, CoreError};

/// Normalises an address for the given channel.
///
/// # Errors
///
/// Returns [`CoreError::InvalidRecipient`] when the address cannot be put
/// into the channel's canonical form.
pub fn normalize(channel: Channel, raw: &str) -> Result<String, CoreError> {
    match channel {
        Channel::Sms | Channel::Whatsapp => normalize_e164(raw),
        Channel::Telegram => normalize_chat_id(raw),
        Channel::Messenger => normalize_psid(raw),
    }
}

/// Normalises a phone number to E.164 (`+` followed by 8..=15 digits).
///
/// Accepts common formatting noise (spaces, dashes, parentheses, a leading
/// `00` international prefix) but does not guess country codes.
pub fn normalize_e164(raw: &str) -> Result<String, CoreError> {
    let stripped: String =
        raw.chars().filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.')).collect();

    let digits = if let Some(rest) = stripped.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = stripped.strip_prefix("00") {
        rest.to_string()
    } else {
        return Err(CoreError::InvalidRecipient(format!(
            "phone number must carry a country code: {raw}"
        )));
    };

    if digits.len() < 8 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(CoreError::InvalidRecipient(format!("not a valid E.164 number: {raw}")));
    }

    Ok(format!("+{digits}"))
}

/// Validates a Telegram numeric chat ID (possibly negative for groups).
pub fn normalize_chat_id(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim();
    if trimmed.parse::<i64>().is_ok() {
        Ok(trimmed.to_string())
    } else {
        Err(CoreError::InvalidRecipient(format!("not a numeric telegram chat id: {raw}")))
    }
}

/// Validates a Messenger page-scoped ID (decimal digits).
pub fn normalize_psid(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        Ok(trimmed.to_string())
    } else {
        Err(CoreError::InvalidRecipient(format!("not a valid messenger PSID: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e164_accepts_formatting_noise() {
        assert_eq!(normalize_e164("+1 (415) 555-0123").unwrap(), "+14155550123");
        assert_eq!(normalize_e164("0044 20 7946 0958").unwrap(), "+442079460958");
    }

    #[test]
    fn e164_rejects_missing_country_code() {
        assert!(normalize_e164("4155550123").is_err());
        assert!(normalize_e164("+123").is_err());
        assert!(normalize_e164("+1415555abcd").is_err());
    }

    #[test]
    fn chat_ids_are_numeric() {
        assert_eq!(normalize_chat_id("123456789").unwrap(), "123456789");
        assert_eq!(normalize_chat_id("-1001234567890").unwrap(), "-1001234567890");
        assert!(normalize_chat_id("@channel").is_err());
    }

    #[test]
    fn psids_are_digit_strings() {
        assert_eq!(normalize_psid("24085345005").unwrap(), "24085345005");
        assert!(normalize_psid("user-1").is_err());
        assert!(normalize_psid("").is_err());
    }
}
