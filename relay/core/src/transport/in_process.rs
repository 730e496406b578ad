//! In-Process Transport
//!
//! A channel-backed stand-in for the messaging network. It is used when the
//! relay is embedded without a gateway and by every session and dispatch
//! test.
//!
//! [`InProcessNetwork`] is the operator's side: it hands out adapters through
//! [`TransportFactory`], records every send in order, and lets the caller
//! approve pairing, drop connections with a chosen reason, refuse connects,
//! or fail a specific send.
//!
//! # Usage
//!
//! ```ignore
//! let network = InProcessNetwork::new();
//! let manager = SessionManager::new(Arc::new(network.clone()), store, config);
//! manager.start()?;
//!
//! // First run: no credentials, so the network issues a pairing code
//! network.approve_pairing(Credentials::new(json!({"device": 1})));
//!
//! // Later: a transient drop
//! network.drop_connection(DisconnectReason::ConnectionLost);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{
    Credentials, DisconnectReason, MessagingTransport, OutboundImage, RecipientAddress,
    TransportError, TransportEvent, TransportFactory,
};

/// Event channel capacity per connection
const EVENT_CAPACITY: usize = 32;

/// A message the in-process network accepted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentMessage {
    /// A text message
    Text {
        /// Destination
        to: RecipientAddress,
        /// Message body
        text: String,
    },
    /// An image message
    Image {
        /// Destination
        to: RecipientAddress,
        /// Caption shown with the image
        caption: String,
        /// MIME type of the image
        mime_type: String,
        /// Image size in bytes
        size: usize,
    },
}

impl SentMessage {
    /// Caption of an image, or `None` for text
    #[must_use]
    pub fn caption(&self) -> Option<&str> {
        match self {
            Self::Image { caption, .. } => Some(caption),
            Self::Text { .. } => None,
        }
    }

    /// Body of a text message, or `None` for images
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::Image { .. } => None,
        }
    }
}

struct Link {
    id: u64,
    events: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
}

#[derive(Default)]
struct NetworkState {
    sent: Mutex<Vec<SentMessage>>,
    send_attempts: AtomicUsize,
    fail_send_at: Mutex<Option<usize>>,
    send_latency: Mutex<Duration>,
    refuse_connections: AtomicBool,
    connects: Mutex<Vec<Option<Credentials>>>,
    current: Mutex<Option<Link>>,
    next_link: AtomicU64,
    pairing_codes: AtomicU32,
}

impl NetworkState {
    fn emit(&self, event: TransportEvent) -> bool {
        let current = self.current.lock();
        match current.as_ref() {
            Some(link) => link.events.try_send(event).is_ok(),
            None => false,
        }
    }

    fn next_pairing_code(&self) -> String {
        let n = self.pairing_codes.fetch_add(1, Ordering::SeqCst) + 1;
        format!("pairing-{n}")
    }
}

/// Operator handle for the in-process network
#[derive(Clone, Default)]
pub struct InProcessNetwork {
    state: Arc<NetworkState>,
}

impl InProcessNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete the pending pairing on the current connection
    ///
    /// Emits the new credentials followed by `Opened`. Returns `false` if no
    /// connection is live.
    pub fn approve_pairing(&self, credentials: Credentials) -> bool {
        let current = self.state.current.lock();
        let Some(link) = current.as_ref() else {
            return false;
        };
        if link
            .events
            .try_send(TransportEvent::CredentialsUpdated(credentials))
            .is_err()
        {
            return false;
        }
        link.connected.store(true, Ordering::SeqCst);
        link.events.try_send(TransportEvent::Opened).is_ok()
    }

    /// Issue a fresh pairing code on the current connection
    pub fn refresh_pairing_code(&self) -> bool {
        let code = self.state.next_pairing_code();
        self.state.emit(TransportEvent::PairingCode(code))
    }

    /// Push a credential rotation on the current connection
    pub fn rotate_credentials(&self, credentials: Credentials) -> bool {
        self.state
            .emit(TransportEvent::CredentialsUpdated(credentials))
    }

    /// Close the current connection from the network side
    pub fn drop_connection(&self, reason: DisconnectReason) -> bool {
        let Some(link) = self.state.current.lock().take() else {
            return false;
        };
        link.connected.store(false, Ordering::SeqCst);
        link.events.try_send(TransportEvent::Closed(reason)).is_ok()
    }

    /// Make subsequent `connect` calls fail
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Fail the send with this 0-based index (counted across all sends)
    pub fn fail_send_at(&self, index: usize) {
        *self.state.fail_send_at.lock() = Some(index);
    }

    /// Delay every send by `latency` before it is recorded
    pub fn set_send_latency(&self, latency: Duration) {
        *self.state.send_latency.lock() = latency;
    }

    /// Every accepted message, in acceptance order
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.sent.lock().clone()
    }

    /// Number of send calls, including failed ones
    #[must_use]
    pub fn send_attempts(&self) -> usize {
        self.state.send_attempts.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls that reached the network
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.connects.lock().len()
    }

    /// Credentials presented by each `connect` call, in order
    #[must_use]
    pub fn connect_credentials(&self) -> Vec<Option<Credentials>> {
        self.state.connects.lock().clone()
    }

    /// Whether a connection is currently live
    #[must_use]
    pub fn has_connection(&self) -> bool {
        self.state.current.lock().is_some()
    }
}

impl TransportFactory for InProcessNetwork {
    fn create(&self) -> Arc<dyn MessagingTransport> {
        Arc::new(InProcessTransport {
            network: Arc::clone(&self.state),
            link_id: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Adapter bound to an [`InProcessNetwork`]
pub struct InProcessTransport {
    network: Arc<NetworkState>,
    link_id: Mutex<Option<u64>>,
    connected: Arc<AtomicBool>,
}

impl InProcessTransport {
    async fn accept_send(&self, message: SentMessage) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let index = self.network.send_attempts.fetch_add(1, Ordering::SeqCst);
        if *self.network.fail_send_at.lock() == Some(index) {
            return Err(TransportError::SendFailed(format!(
                "network rejected send #{index}"
            )));
        }

        let latency = *self.network.send_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.network.sent.lock().push(message);
        Ok(())
    }
}

#[async_trait]
impl MessagingTransport for InProcessTransport {
    async fn connect(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        if self.network.refuse_connections.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "in-process network is refusing connections".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let id = self.network.next_link.fetch_add(1, Ordering::SeqCst);
        let paired = credentials.is_some();
        self.network.connects.lock().push(credentials);

        let first = if paired {
            self.connected.store(true, Ordering::SeqCst);
            TransportEvent::Opened
        } else {
            TransportEvent::PairingCode(self.network.next_pairing_code())
        };
        // The receiver is still held here, so a fresh channel always has room
        let _ = tx.try_send(first);

        *self.link_id.lock() = Some(id);
        *self.network.current.lock() = Some(Link {
            id,
            events: tx,
            connected: Arc::clone(&self.connected),
        });

        Ok(rx)
    }

    async fn send_text(&self, to: &RecipientAddress, text: &str) -> Result<(), TransportError> {
        self.accept_send(SentMessage::Text {
            to: to.clone(),
            text: text.to_string(),
        })
        .await
    }

    async fn send_image(
        &self,
        to: &RecipientAddress,
        image: OutboundImage,
    ) -> Result<(), TransportError> {
        self.accept_send(SentMessage::Image {
            to: to.clone(),
            caption: image.caption,
            mime_type: image.mime_type,
            size: image.data.len(),
        })
        .await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        let mine = *self.link_id.lock();
        let mut current = self.network.current.lock();
        if current.as_ref().map(|link| link.id) == mine && mine.is_some() {
            *current = None;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to() -> RecipientAddress {
        RecipientAddress::new("100")
    }

    #[tokio::test]
    async fn test_connect_without_credentials_starts_pairing() {
        let network = InProcessNetwork::new();
        let transport = network.create();

        let mut events = transport.connect(None).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::PairingCode("pairing-1".into()))
        );
        assert!(!transport.is_connected());

        let creds = Credentials::new(json!({"k": 1}));
        assert!(network.approve_pairing(creds.clone()));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::CredentialsUpdated(creds))
        );
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_with_credentials_opens() {
        let network = InProcessNetwork::new();
        let transport = network.create();

        let mut events = transport
            .connect(Some(Credentials::new(json!("saved"))))
            .await
            .unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));
        assert_eq!(network.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let network = InProcessNetwork::new();
        let transport = network.create();

        let result = transport.send_text(&to(), "hello").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert!(network.sent().is_empty());
    }

    #[tokio::test]
    async fn test_injected_send_failure() {
        let network = InProcessNetwork::new();
        let transport = network.create();
        let _events = transport
            .connect(Some(Credentials::new(json!(1))))
            .await
            .unwrap();
        network.fail_send_at(1);

        transport.send_text(&to(), "one").await.unwrap();
        let second = transport.send_text(&to(), "two").await;
        assert!(matches!(second, Err(TransportError::SendFailed(_))));
        transport.send_text(&to(), "three").await.unwrap();

        let texts: Vec<_> = network
            .sent()
            .iter()
            .filter_map(|m| m.text().map(str::to_string))
            .collect();
        assert_eq!(texts, vec!["one", "three"]);
        assert_eq!(network.send_attempts(), 3);
    }

    #[tokio::test]
    async fn test_drop_connection_reports_reason() {
        let network = InProcessNetwork::new();
        let transport = network.create();
        let mut events = transport
            .connect(Some(Credentials::new(json!(1))))
            .await
            .unwrap();
        let _ = events.recv().await;

        assert!(network.drop_connection(DisconnectReason::LoggedOut));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Closed(DisconnectReason::LoggedOut))
        );
        assert!(!transport.is_connected());
        assert!(!network.has_connection());
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let network = InProcessNetwork::new();
        network.set_refuse_connections(true);

        let result = network.create().connect(None).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert_eq!(network.connect_count(), 0);
    }
}
