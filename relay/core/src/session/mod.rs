//! Session Lifecycle
//!
//! The single long-lived connection to the messaging network: its state
//! machine, the manager that drives it, and the handles dispatchers send
//! through.

mod handle;
mod manager;
mod state;

pub use handle::{OutboundSequence, SessionHandle};
pub use manager::{SessionConfig, SessionError, SessionManager};
pub use state::{HealthSnapshot, SessionState};
