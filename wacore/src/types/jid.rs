use thiserror::Error;

/// Server part appended to bare phone numbers.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JidError {
    #[error("recipient {0:?} contains no phone digits")]
    NoDigits(String),
}

/// Turns a caller-supplied recipient into a chat address.
///
/// Anything that already carries a server part (`@`) is passed through
/// untouched; otherwise the digits are extracted and the user server is
/// appended, so `"+1 (555) 123-4567"` becomes `15551234567@s.whatsapp.net`.
pub fn normalize_recipient(recipient: &str) -> Result<String, JidError> {
    if recipient.contains('@') {
        return Ok(recipient.to_string());
    }
    let digits: String = recipient.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(JidError::NoDigits(recipient.to_string()));
    }
    Ok(format!("{digits}@{DEFAULT_USER_SERVER}"))
}

/// Extracts the phone number from an account id such as `5551234:1@s.whatsapp.net`.
pub fn phone_from_account_id(account_id: &str) -> String {
    account_id
        .split([':', '@'])
        .next()
        .unwrap_or_default()
        .to_string()
}

/// The user part of a chat address (`123@g.us` -> `123`).
pub fn user_part(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_recipient() {
        assert_eq!(
            normalize_recipient("+1 (555) 123-4567").unwrap(),
            "15551234567@s.whatsapp.net"
        );
        assert_eq!(
            normalize_recipient("120363@g.us").unwrap(),
            "120363@g.us"
        );
        assert_eq!(
            normalize_recipient("call me"),
            Err(JidError::NoDigits("call me".to_string()))
        );
    }

    #[test]
    fn test_phone_from_account_id() {
        assert_eq!(phone_from_account_id("5551234:1@s.whatsapp.net"), "5551234");
        assert_eq!(phone_from_account_id("5551234@s.whatsapp.net"), "5551234");
        assert_eq!(phone_from_account_id("5551234"), "5551234");
        assert_eq!(user_part("99@g.us"), "99");
    }
}
