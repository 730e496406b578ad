//! Transport Configuration
//!
//! Selects the adapter implementation and carries connection and reconnection
//! tuning.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport type selection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    /// Channel-backed network inside this process (embedding and tests)
    #[default]
    InProcess,

    /// Out-of-process protocol gateway reached over a Unix socket
    ///
    /// Default: `$XDG_RUNTIME_DIR/submission-relay/gateway.sock`
    /// Fallback: `/tmp/submission-relay-$UID/gateway.sock`
    Gateway {
        /// Socket path (None = use default)
        socket_path: Option<PathBuf>,
    },
}

/// Transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Which transport to use
    pub transport: TransportType,

    /// How long to wait when connecting to the gateway
    pub connect_timeout_ms: u64,

    /// How long a single send may wait for the network's acknowledgement
    pub send_timeout_ms: u64,

    /// Consecutive failed connection attempts before giving up (0 = unlimited)
    pub reconnect_attempts: u32,

    /// Initial delay between reconnection attempts in milliseconds
    ///
    /// Doubles every attempt up to `max_reconnect_delay_ms`.
    pub reconnect_delay_ms: u64,

    /// Upper bound for the reconnection delay
    pub max_reconnect_delay_ms: u64,

    /// Add up to 25% random jitter to reconnection delays
    pub jitter: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport: TransportType::default(),
            connect_timeout_ms: 5000,
            send_timeout_ms: 30_000,
            reconnect_attempts: 10,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl TransportConfig {
    /// Configuration for the in-process network
    #[must_use]
    pub fn embedded() -> Self {
        Self {
            transport: TransportType::InProcess,
            ..Default::default()
        }
    }

    /// Configuration for the gateway at its default socket
    #[must_use]
    pub fn gateway() -> Self {
        Self {
            transport: TransportType::Gateway { socket_path: None },
            ..Default::default()
        }
    }

    /// Tight, deterministic timings for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            transport: TransportType::InProcess,
            connect_timeout_ms: 200,
            send_timeout_ms: 200,
            reconnect_attempts: 3,
            reconnect_delay_ms: 10,
            max_reconnect_delay_ms: 40,
            jitter: false,
        }
    }

    /// Connect timeout as a `Duration`
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Send timeout as a `Duration`
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Delay before reconnection attempt N (0-indexed)
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self
            .reconnect_delay_ms
            .saturating_mul(1u64 << attempt.min(16));
        let capped = base.min(self.max_reconnect_delay_ms);

        let delay_ms = if self.jitter {
            let jitter = rand::random::<f64>() * 0.25;
            #[allow(
                clippy::cast_precision_loss,
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss
            )]
            let jittered = (capped as f64 * (1.0 + jitter)) as u64;
            jittered
        } else {
            capped
        };

        Duration::from_millis(delay_ms)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures
    #[must_use]
    pub fn allows_attempt(&self, failures: u32) -> bool {
        self.reconnect_attempts == 0 || failures < self.reconnect_attempts
    }

    /// Check if this is an in-process configuration
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        matches!(self.transport, TransportType::InProcess)
    }
}

/// Directory for runtime sockets
///
/// Uses `XDG_RUNTIME_DIR` if available, otherwise `/tmp/submission-relay-$UID/`.
#[must_use]
pub fn runtime_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("submission-relay")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/submission-relay-{uid}"))
    }
}

/// Default path of the protocol gateway's socket
#[must_use]
pub fn default_gateway_socket_path() -> PathBuf {
    runtime_dir().join("gateway.sock")
}
