//! Profile models

use serde::{Deserialize, Serialize};

use crate::im::error::{ChatError, Result};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 30;
pub const BIO_MAX_CHARS: usize = 500;

/// Identity record, one per registered identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Same value as the owning identity id
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub created_at: i64,
}

/// Owner-side profile edit; `None` leaves a field untouched, an empty string
/// clears an optional field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

/// Lower-case a free-form hint into username alphabet, padding short results.
pub fn normalize_username(hint: &str) -> String {
    // drop an email domain if one was passed in
    let local = hint.split('@').next().unwrap_or_default();
    let name: String = local
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let mut name = name.trim_matches('_').to_string();
    if name.len() < USERNAME_MIN_LEN {
        name = format!("user_{name}");
    }
    name.truncate(USERNAME_MAX_LEN);
    name
}

pub fn validate_username(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid_chars || name.len() < USERNAME_MIN_LEN || name.len() > USERNAME_MAX_LEN {
        return Err(ChatError::Validation(format!(
            "username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters of a-z, 0-9 or _"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_become_valid_usernames() {
        assert_eq!(normalize_username("Alice.Smith@example.com"), "alice_smith");
        assert_eq!(normalize_username("  Bob  "), "bob");
        assert_eq!(normalize_username("x"), "user_x");
        assert_eq!(normalize_username("!!"), "user_");
        assert_eq!(normalize_username(&"z".repeat(80)).len(), USERNAME_MAX_LEN);

        for hint in ["Alice.Smith@example.com", "x", "!!", "Ünïcode"] {
            validate_username(&normalize_username(hint)).unwrap();
        }
    }

    #[test]
    fn bad_usernames_are_rejected() {
        assert!(validate_username("ab").is_err());
        assert!(validate_username("Has Caps").is_err());
        assert!(validate_username("ok_name_1").is_ok());
    }
}
