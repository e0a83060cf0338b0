use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Characters the registration form counts as "special".
const SPECIAL_CHARS: &str = "!@#$%^&*";

/// Minimum password length the registration form asks for.
const MIN_PASSWORD_LENGTH: usize = 8;

#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    #[serde(deserialize_with = "super::timestamp::deserialize")]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Session credential pair returned by `POST /auth/login`.
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Body of `POST /auth/refresh`.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Response of `POST /auth/refresh`.
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Advisory password checklist shown while registering. Never blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordStrength {
    pub length: bool,
    pub has_number: bool,
    pub has_upper: bool,
    pub has_special: bool,
}

impl PasswordStrength {
    pub fn evaluate(password: &str) -> Self {
        Self {
            length: password.chars().count() >= MIN_PASSWORD_LENGTH,
            has_number: password.chars().any(|c| c.is_ascii_digit()),
            has_upper: password.chars().any(|c| c.is_ascii_uppercase()),
            has_special: password.chars().any(|c| SPECIAL_CHARS.contains(c)),
        }
    }

    /// Number of satisfied rules, 0 to 4.
    pub fn score(&self) -> usize {
        [self.length, self.has_number, self.has_upper, self.has_special]
            .iter()
            .filter(|ok| **ok)
            .count()
    }

    pub fn is_strong(&self) -> bool {
        self.score() == 4
    }

    /// Checklist rows as (label, satisfied).
    pub fn checklist(&self) -> [(&'static str, bool); 4] {
        [
            ("At least 8 characters", self.length),
            ("Contains a number", self.has_number),
            ("Contains an uppercase letter", self.has_upper),
            ("Contains a special character (!@#$%^&*)", self.has_special),
        ]
    }
}
