//! Session state.

use std::fmt;

/// Connection-level session state.
///
/// Exactly one value holds at a time; transitions are driven by protocol
/// events and transport close only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport open, greeting received or pending.
    Connected,
    /// Credential exchange in progress.
    Authenticating,
    /// Logged in and ready for mailbox commands.
    Authenticated,
    /// LOGOUT sent or BYE received; the transport is winding down.
    Closing,
}

impl SessionState {
    /// Returns `true` once login completed and until the session winds down.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// Returns `true` while commands may still be written.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Closing => "closing",
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(SessionState::default(), SessionState::Disconnected);
        assert!(!SessionState::Disconnected.is_writable());
    }

    #[test]
    fn test_is_authenticated() {
        assert!(!SessionState::Connected.is_authenticated());
        assert!(!SessionState::Authenticating.is_authenticated());
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(!SessionState::Closing.is_authenticated());
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::Authenticated.to_string(), "authenticated");
        assert_eq!(SessionState::Closing.to_string(), "closing");
    }
}
