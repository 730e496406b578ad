//! Session Events
//!
//! Notifications broadcast by the session manager. Logging, the pairing
//! display, and health reporting subscribe to these; nothing in the lifecycle
//! depends on anyone listening.

use serde::{Deserialize, Serialize};

use crate::session::SessionState;

/// Events from the session manager to its observers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    // ============================================
    // Lifecycle
    // ============================================
    /// The session moved to a new state
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },

    /// Pairing challenge for the account owner (refreshed periodically)
    ///
    /// The payload is what a phone scans to link the device.
    PairingChallenge {
        /// Challenge payload
        code: String,
    },

    // ============================================
    // Failures
    // ============================================
    /// Updated credentials could not be stored; the session keeps running
    PersistenceFailed {
        /// What went wrong
        error: String,
    },

    /// The account owner unlinked this device; the session is closed for good
    ///
    /// Every submission fails as not-ready until the relay is paired again.
    Revoked,

    /// Reconnection gave up after the configured number of attempts
    ReconnectExhausted {
        /// Consecutive failed attempts
        attempts: u32,
    },
}

impl SessionEvent {
    /// Whether this event ends the session for good
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoked | Self::ReconnectExhausted { .. })
    }
}
