//! Gateway Transport
//!
//! Adapter for an out-of-process protocol gateway. The gateway owns the real
//! messaging-network client (handshake, encryption, media upload); this side
//! only speaks frames over a Unix socket.
//!
//! # Protocol
//!
//! ```text
//!   relay                                  gateway
//!     │── Connect { credentials } ───────────►│
//!     │◄── PairingCode { code } ──────────────│  (no credentials)
//!     │◄── CredentialsUpdated { .. } ─────────│
//!     │◄── Opened ────────────────────────────│
//!     │── SendText { id, to, text } ─────────►│
//!     │◄── SendResult { id, error: None } ────│
//!     │◄── Closed { reason } ─────────────────│
//! ```
//!
//! Every send carries an id and waits for the matching `SendResult`, so a
//! send only resolves once the network has accepted (or refused) it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::frame::{write_frame, FrameDecoder};
use super::traits::{
    Credentials, DisconnectReason, MessagingTransport, OutboundImage, RecipientAddress,
    TransportError, TransportEvent, TransportFactory,
};
use super::TransportConfig;

/// Commands sent to the gateway
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Open a session, pairing if `credentials` is absent
    Connect {
        /// Stored credentials from the last run
        credentials: Option<Credentials>,
    },
    /// Send a text message
    SendText {
        /// Correlates the `SendResult`
        id: u64,
        /// Full recipient address
        to: String,
        /// Message body
        text: String,
    },
    /// Send an image message
    SendImage {
        /// Correlates the `SendResult`
        id: u64,
        /// Full recipient address
        to: String,
        /// Base64-encoded image bytes
        data: String,
        /// MIME type of the image
        mime_type: String,
        /// Caption shown with the image
        caption: String,
    },
    /// Close the network session (credentials stay valid)
    Disconnect,
}

/// Events reported by the gateway
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Pairing challenge to show the account owner
    PairingCode {
        /// Challenge payload (rendered as a QR code by operators)
        code: String,
    },
    /// Credentials changed
    CredentialsUpdated {
        /// The new credential blob
        credentials: Credentials,
    },
    /// Session is authenticated
    Opened,
    /// Session closed
    Closed {
        /// Why it closed
        reason: DisconnectReason,
    },
    /// Outcome of a send command
    SendResult {
        /// Id from the command
        id: u64,
        /// Failure description; absent on success
        #[serde(default)]
        error: Option<String>,
    },
}

type PendingSends = Arc<DashMap<u64, oneshot::Sender<Result<(), String>>>>;

/// Creates [`GatewayTransport`]s for one socket path
pub struct GatewayFactory {
    socket_path: PathBuf,
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl GatewayFactory {
    /// Create a factory from transport configuration
    #[must_use]
    pub fn new(socket_path: PathBuf, config: &TransportConfig) -> Self {
        Self {
            socket_path,
            connect_timeout: config.connect_timeout(),
            send_timeout: config.send_timeout(),
        }
    }
}

impl TransportFactory for GatewayFactory {
    fn create(&self) -> Arc<dyn MessagingTransport> {
        Arc::new(GatewayTransport::new(
            self.socket_path.clone(),
            self.connect_timeout,
            self.send_timeout,
        ))
    }
}

/// Messaging adapter backed by the protocol gateway
pub struct GatewayTransport {
    socket_path: PathBuf,
    connect_timeout: Duration,
    send_timeout: Duration,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    pending: PendingSends,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl GatewayTransport {
    /// Create an unconnected adapter
    #[must_use]
    pub fn new(socket_path: PathBuf, connect_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            socket_path,
            connect_timeout,
            send_timeout,
            writer: tokio::sync::Mutex::new(None),
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            connected: Arc::new(AtomicBool::new(false)),
            reader: parking_lot::Mutex::new(None),
        }
    }

    /// Get the socket path
    #[must_use]
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    async fn write_command(&self, command: &GatewayCommand) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        write_frame(stream, command).await
    }

    async fn send_and_wait(&self, id: u64, command: GatewayCommand) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if let Err(e) = self.write_command(&command).await {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.send_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(TransportError::SendFailed(reason)),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(TransportError::Timeout(format!(
                    "no send result for #{id} within {:?}",
                    self.send_timeout
                )))
            }
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Read gateway frames until the socket closes, forwarding connection events
async fn read_loop(
    mut read_half: OwnedReadHalf,
    events: mpsc::Sender<TransportEvent>,
    pending: PendingSends,
    connected: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut closed_reported = false;

    'read: loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("Gateway closed the socket");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Gateway read error");
                break;
            }
        };
        decoder.push(&buf[..n]);

        loop {
            let event = match decoder.decode::<GatewayEvent>() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(TransportError::FrameTooLarge { size, max }) => {
                    tracing::error!(size, max, "Oversized gateway frame, dropping connection");
                    break 'read;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed gateway frame");
                    continue;
                }
            };

            let forward = match event {
                GatewayEvent::SendResult { id, error } => {
                    match pending.remove(&id) {
                        Some((_, waiter)) => {
                            let _ = waiter.send(error.map_or(Ok(()), Err));
                        }
                        None => tracing::debug!(id, "Send result for unknown or expired id"),
                    }
                    continue;
                }
                GatewayEvent::PairingCode { code } => TransportEvent::PairingCode(code),
                GatewayEvent::CredentialsUpdated { credentials } => {
                    TransportEvent::CredentialsUpdated(credentials)
                }
                GatewayEvent::Opened => {
                    connected.store(true, Ordering::SeqCst);
                    TransportEvent::Opened
                }
                GatewayEvent::Closed { reason } => {
                    connected.store(false, Ordering::SeqCst);
                    closed_reported = true;
                    TransportEvent::Closed(reason)
                }
            };

            if events.send(forward).await.is_err() {
                tracing::debug!("Event receiver dropped");
                break 'read;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    pending.clear();
    if !closed_reported {
        let _ = events
            .send(TransportEvent::Closed(DisconnectReason::ConnectionLost))
            .await;
    }
}

#[async_trait]
impl MessagingTransport for GatewayTransport {
    async fn connect(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        if self.writer.lock().await.is_some() {
            return Err(TransportError::InvalidState(
                "Already connected".to_string(),
            ));
        }

        let stream = tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| {
                TransportError::Timeout(format!(
                    "connecting to gateway at {}",
                    self.socket_path.display()
                ))
            })?
            .map_err(|e| {
                TransportError::ConnectionFailed(format!(
                    "Failed to connect to {}: {e}",
                    self.socket_path.display()
                ))
            })?;

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);

        let (event_tx, event_rx) = mpsc::channel(64);
        let task = tokio::spawn(read_loop(
            read_half,
            event_tx,
            Arc::clone(&self.pending),
            Arc::clone(&self.connected),
        ));
        if let Some(previous) = self.reader.lock().replace(task) {
            previous.abort();
        }

        self.write_command(&GatewayCommand::Connect { credentials })
            .await?;

        tracing::info!(path = %self.socket_path.display(), "Connected to protocol gateway");
        Ok(event_rx)
    }

    async fn send_text(&self, to: &RecipientAddress, text: &str) -> Result<(), TransportError> {
        let id = self.next_id();
        self.send_and_wait(
            id,
            GatewayCommand::SendText {
                id,
                to: to.as_str().to_string(),
                text: text.to_string(),
            },
        )
        .await
    }

    async fn send_image(
        &self,
        to: &RecipientAddress,
        image: OutboundImage,
    ) -> Result<(), TransportError> {
        let id = self.next_id();
        let data = base64::engine::general_purpose::STANDARD.encode(&image.data);
        self.send_and_wait(
            id,
            GatewayCommand::SendImage {
                id,
                to: to.as_str().to_string(),
                data,
                mime_type: image.mime_type,
                caption: image.caption,
            },
        )
        .await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);

        let mut writer = self.writer.lock().await;
        if let Some(mut stream) = writer.take() {
            if let Err(e) = write_frame(&mut stream, &GatewayCommand::Disconnect).await {
                tracing::debug!(error = %e, "Gateway already gone while disconnecting");
            }
        }
        drop(writer);

        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
        self.pending.clear();

        tracing::info!("Disconnected from protocol gateway");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for GatewayTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader.get_mut().take() {
            task.abort();
        }
    }
}
