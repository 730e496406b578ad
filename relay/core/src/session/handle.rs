//! Ready-session handles and the outbound gate

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::transport::{MessagingTransport, OutboundImage, RecipientAddress, TransportError};

/// Mutex serializing whole send sequences across every handle of a manager
pub(crate) type OutboundGate = Arc<Mutex<()>>;

/// A usable view of the session as it was when acquired
///
/// The handle pins the adapter of one connection. If that connection drops,
/// sends through the handle fail with [`TransportError::NotConnected`]; the
/// session manager reconnects on its own and callers acquire a new handle.
#[derive(Clone)]
pub struct SessionHandle {
    transport: Arc<dyn MessagingTransport>,
    gate: OutboundGate,
    recipient: RecipientAddress,
}

impl SessionHandle {
    pub(crate) fn new(
        transport: Arc<dyn MessagingTransport>,
        gate: OutboundGate,
        recipient: RecipientAddress,
    ) -> Self {
        Self {
            transport,
            gate,
            recipient,
        }
    }

    /// The fixed destination of every send
    #[must_use]
    pub fn recipient(&self) -> &RecipientAddress {
        &self.recipient
    }

    /// Whether the pinned connection is still open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Take the outbound gate
    ///
    /// Waits while another sequence is in progress. Everything sent through
    /// the returned guard reaches the wire without interleaving.
    pub async fn begin_sequence(&self) -> OutboundSequence {
        let guard = Arc::clone(&self.gate).lock_owned().await;
        OutboundSequence {
            transport: Arc::clone(&self.transport),
            recipient: self.recipient.clone(),
            _gate: guard,
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("recipient", &self.recipient)
            .field("connected", &self.transport.is_connected())
            .finish()
    }
}

/// Exclusive right to send until dropped
pub struct OutboundSequence {
    transport: Arc<dyn MessagingTransport>,
    recipient: RecipientAddress,
    _gate: OwnedMutexGuard<()>,
}

impl OutboundSequence {
    /// Send a text message to the recipient
    ///
    /// # Errors
    ///
    /// Adapter failures, including `NotConnected` after a disconnect.
    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.transport.send_text(&self.recipient, text).await
    }

    /// Send an image message to the recipient
    ///
    /// # Errors
    ///
    /// Adapter failures, including `NotConnected` after a disconnect.
    pub async fn send_image(&self, image: OutboundImage) -> Result<(), TransportError> {
        self.transport.send_image(&self.recipient, image).await
    }
}
