//! Presence status types for user online/offline tracking.

use serde::{Deserialize, Serialize};

/// Presence status of a user.
///
/// Derived on the server from the user's active connection count; never set
/// directly by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceStatus {
    /// The user has at least one live connection.
    Online,
    /// The user has no live connection.
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}
