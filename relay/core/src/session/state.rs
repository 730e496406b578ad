//! Session state machine states

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the single outbound session
///
/// ```text
///  Uninitialized ──► Pairing ────┐
///        │              ▲        ▼
///        └────────► Connecting ─► Ready
///                       │          │
///                       ▼          ▼
///                   Reconnecting ◄─┘
///                       │
///                       ▼
///                    Closed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// `start` has not run yet
    #[default]
    Uninitialized,
    /// No credentials; waiting for the account owner to approve a challenge
    Pairing,
    /// Connecting with stored credentials
    Connecting,
    /// Authenticated; the only state in which sends are allowed
    Ready,
    /// Lost the connection; waiting out backoff or retrying
    Reconnecting,
    /// Revoked, out of attempts, or shut down
    Closed,
}

impl SessionState {
    /// Whether submissions can be dispatched
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    /// Whether the lifecycle has ended
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    /// Lowercase name used in logs and health replies
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Pairing => "pairing",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time health report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Current state
    pub state: SessionState,
    /// Whether submissions would be accepted right now
    pub ready: bool,
}

impl From<SessionState> for HealthSnapshot {
    fn from(state: SessionState) -> Self {
        Self {
            state,
            ready: state.is_ready(),
        }
    }
}
