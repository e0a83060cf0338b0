use serde::{Deserialize, Serialize};

/// Session lifecycle changes broadcast by the API client.
///
/// The data layer never navigates anywhere itself; the presentation layer
/// subscribes and decides how to react (e.g. send the user back to login
/// on `Expired`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    LoggedIn { username: String },
    Refreshed,
    LoggedOut,
    /// The refresh credential was rejected or missing; both credentials
    /// have been cleared.
    Expired { reason: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::LoggedIn { username } => write!(f, "Logged in as {}", username),
            SessionEvent::Refreshed => write!(f, "Access token refreshed"),
            SessionEvent::LoggedOut => write!(f, "Logged out"),
            SessionEvent::Expired { reason } => write!(f, "Session expired: {}", reason),
        }
    }
}
