//! Identity and role definitions shared by the relay and its clients.

use serde::{Deserialize, Serialize};

/// Role granted to an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Plain user: talks to the bot, may be escalated to administrators.
    User,
    /// Administrator: receives escalations and can reply to users directly.
    Admin,
}

impl Role {
    /// Returns `true` for [`Role::Admin`].
    #[must_use]
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// An authenticated user, bound to a session for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id, the registry key.
    pub id: String,
    /// Human-readable name shown as the envelope sender.
    pub display_name: String,
    /// Role driving the routing policy.
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    }

    #[test]
    fn is_admin_only_for_admin() {
        assert!(Role::Admin.is_admin());
        assert!(!Role::User.is_admin());
    }
}
