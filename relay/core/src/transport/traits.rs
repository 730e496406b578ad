//! Transport Traits
//!
//! Core trait definitions for the messaging-network boundary.
//!
//! The protocol itself (handshake, encryption, framing) lives outside this
//! crate. Everything here sees it as an opaque client that can connect with
//! optional credentials, send text and images, and report connection-state
//! events.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Opaque pairing credentials
///
/// The format is owned by the protocol layer. This crate only stores the blob
/// and hands it back on the next connect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub serde_json::Value);

impl Credentials {
    /// Wrap a raw credential value
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Destination identity on the messaging network
///
/// A bare phone number is expanded to the network's user address form.
/// Anything that already contains `@` is kept as-is.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientAddress(String);

impl RecipientAddress {
    /// Suffix appended to bare phone numbers
    pub const USER_DOMAIN: &'static str = "s.whatsapp.net";

    /// Build an address from a configured value
    #[must_use]
    pub fn new(value: &str) -> Self {
        let value = value.trim();
        if value.contains('@') {
            Self(value.to_string())
        } else {
            let digits: String = value.chars().filter(char::is_ascii_digit).collect();
            Self(format!("{digits}@{}", Self::USER_DOMAIN))
        }
    }

    /// The full network address
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the network closed a connection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The account owner unlinked this device; credentials are dead
    LoggedOut,
    /// Socket dropped or the peer stopped answering
    ConnectionLost,
    /// Another client took over the session
    ConnectionReplaced,
    /// The network asked for a fresh connection
    RestartRequired,
    /// Handshake or keepalive timed out
    TimedOut,
    /// Anything the adapter could not classify
    Other(String),
}

impl DisconnectReason {
    /// Whether this disconnect revokes the session permanently
    #[must_use]
    pub fn is_revocation(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged out"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::ConnectionReplaced => write!(f, "connection replaced"),
            Self::RestartRequired => write!(f, "restart required"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Connection-state events reported by an adapter after `connect`
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// A pairing challenge to show the account owner (refreshed periodically)
    PairingCode(String),
    /// Credentials changed and must be persisted
    CredentialsUpdated(Credentials),
    /// The session is authenticated and can send
    Opened,
    /// The connection closed
    Closed(DisconnectReason),
}

/// An image message ready to hand to the adapter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundImage {
    /// Raw image bytes
    pub data: Vec<u8>,
    /// MIME type of `data`
    pub mime_type: String,
    /// Caption shown under the image
    pub caption: String,
}

/// Errors that can occur during transport operations
#[derive(Debug)]
pub enum TransportError {
    /// Connection to the network (or gateway) failed
    ConnectionFailed(String),
    /// Connection was closed
    ConnectionClosed,
    /// Operation requires an open connection
    NotConnected,
    /// The network refused or failed a send
    SendFailed(String),
    /// No answer within the configured timeout
    Timeout(String),
    /// Message serialization/deserialization error
    SerializationError(String),
    /// Frame length above the codec's limit; the stream cannot be resynced
    FrameTooLarge {
        /// Announced or encoded payload size
        size: usize,
        /// Configured maximum
        max: usize,
    },
    /// IO error from underlying transport
    IoError(std::io::Error),
    /// Transport not in expected state
    InvalidState(String),
    /// Frame checksum mismatch - data corruption detected
    ChecksumMismatch {
        /// Expected checksum value
        expected: u32,
        /// Actual checksum value received
        actual: u32,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::Timeout(msg) => write!(f, "Timed out: {msg}"),
            Self::SerializationError(msg) => write!(f, "Serialization error: {msg}"),
            Self::FrameTooLarge { size, max } => {
                write!(f, "Frame too large: {size} bytes (max: {max})")
            }
            Self::IoError(e) => write!(f, "IO error: {e}"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "Checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            ),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

/// Client side of the messaging network
///
/// One instance represents one connection attempt. The session manager
/// creates a fresh instance through a [`TransportFactory`] for every attempt
/// and drops it when the connection ends.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Open the connection
    ///
    /// Without credentials the network starts a pairing flow and reports
    /// [`TransportEvent::PairingCode`]s. The returned receiver yields every
    /// connection-state event until the connection ends.
    async fn connect(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Send a text message; resolves once the network accepted it
    async fn send_text(&self, to: &RecipientAddress, text: &str) -> Result<(), TransportError>;

    /// Send an image message; resolves once the network accepted it
    async fn send_image(
        &self,
        to: &RecipientAddress,
        image: OutboundImage,
    ) -> Result<(), TransportError>;

    /// Close the connection
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;
}

/// Creates adapter instances for the session manager
pub trait TransportFactory: Send + Sync {
    /// Build a new, unconnected adapter
    fn create(&self) -> Arc<dyn MessagingTransport>;
}
