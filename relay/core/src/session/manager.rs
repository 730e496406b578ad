//! Session Manager
//!
//! Owns the single connection to the messaging network. One background task
//! drives the lifecycle: load credentials, connect a fresh adapter, relay its
//! events, and on disconnect either reconnect with backoff or stop for good.
//!
//! Everything else only reads a state snapshot or asks for a
//! [`SessionHandle`]; acquisition never waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use super::handle::{OutboundGate, SessionHandle};
use super::state::{HealthSnapshot, SessionState};
use crate::credentials::CredentialStore;
use crate::events::SessionEvent;
use crate::transport::{
    Credentials, DisconnectReason, MessagingTransport, RecipientAddress, TransportConfig,
    TransportEvent, TransportFactory,
};

/// Broadcast buffer for session events
const EVENT_CAPACITY: usize = 64;

/// Errors from the session manager's public API
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// `start` was already called on this manager
    #[error("Session manager already started")]
    AlreadyStarted,

    /// No ready session right now
    #[error("Session not ready (state: {state})")]
    NotReady {
        /// State at the time of the request
        state: SessionState,
    },
}

/// Session manager settings
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Fixed destination of every send
    pub recipient: RecipientAddress,

    /// How long a pairing challenge may stay unanswered
    ///
    /// Expiry counts as a failed connection attempt.
    pub pairing_timeout: Duration,

    /// How long a connect with stored credentials may take to open
    pub handshake_timeout: Duration,

    /// Reconnection policy
    pub transport: TransportConfig,
}

impl SessionConfig {
    /// Defaults for one recipient
    #[must_use]
    pub fn new(recipient: RecipientAddress) -> Self {
        Self {
            recipient,
            pairing_timeout: Duration::from_secs(120),
            handshake_timeout: Duration::from_secs(30),
            transport: TransportConfig::default(),
        }
    }
}

/// How one connection attempt ended
#[derive(Debug)]
enum ConnectionOutcome {
    /// Never reached `Ready`
    Failed,
    /// Was `Ready`, then closed for a recoverable reason
    Lost(DisconnectReason),
    /// Logged out by the account owner
    Revoked,
    /// Shutdown requested
    Shutdown,
}

/// State shared between the manager, its lifecycle task, and handles
struct Shared {
    state: RwLock<SessionState>,
    ready: RwLock<Option<Arc<dyn MessagingTransport>>>,
    events: broadcast::Sender<SessionEvent>,
    gate: OutboundGate,
    recipient: RecipientAddress,
}

impl Shared {
    fn transition(&self, to: SessionState) {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if from == to {
                return;
            }
            *state = to;
            from
        };

        tracing::info!(from = %from, to = %to, "Session state changed");
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_ready(&self, transport: Option<Arc<dyn MessagingTransport>>) {
        *self.ready.write() = transport;
    }
}

/// Lifecycle owner of the single outbound session
pub struct SessionManager {
    shared: Arc<Shared>,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn CredentialStore>,
    config: SessionConfig,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a manager; nothing connects until [`start`](Self::start)
    #[must_use]
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(SessionState::Uninitialized),
                ready: RwLock::new(None),
                events,
                gate: Arc::new(tokio::sync::Mutex::new(())),
                recipient: config.recipient.clone(),
            }),
            factory,
            store,
            config,
            started: AtomicBool::new(false),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Spawn the lifecycle task
    ///
    /// Returns as soon as the task is running.
    ///
    /// # Errors
    ///
    /// `SessionError::AlreadyStarted` on a second call.
    pub fn start(&self) -> Result<(), SessionError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }

        let lifecycle = Lifecycle {
            shared: Arc::clone(&self.shared),
            factory: Arc::clone(&self.factory),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            shutdown: self.shutdown_tx.subscribe(),
        };

        tracing::info!(recipient = %self.shared.recipient, "Starting session manager");
        *self.task.lock() = Some(tokio::spawn(lifecycle.run()));
        Ok(())
    }

    /// Stop the lifecycle task and close the session
    ///
    /// Waits for the task to disconnect the adapter. Handles already given out
    /// keep working only until their in-flight send fails.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Session lifecycle task failed");
            }
        }

        self.shared.set_ready(None);
        self.shared.transition(SessionState::Closed);
    }

    /// Non-blocking snapshot of the state
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// State plus readiness, for health reporting
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot::from(self.current_state())
    }

    /// Get a handle to the ready session
    ///
    /// # Errors
    ///
    /// `SessionError::NotReady` immediately in any state but `Ready`.
    pub fn acquire_ready_session(&self) -> Result<SessionHandle, SessionError> {
        let state = self.current_state();
        if !state.is_ready() {
            return Err(SessionError::NotReady { state });
        }

        match self.shared.ready.read().as_ref() {
            Some(transport) => Ok(SessionHandle::new(
                Arc::clone(transport),
                Arc::clone(&self.shared.gate),
                self.shared.recipient.clone(),
            )),
            None => Err(SessionError::NotReady { state }),
        }
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Session events as a stream
    ///
    /// Events missed by a slow consumer are skipped.
    pub fn events(&self) -> impl Stream<Item = SessionEvent> {
        BroadcastStream::new(self.subscribe()).filter_map(Result::ok)
    }

    /// The configured recipient
    #[must_use]
    pub fn recipient(&self) -> &RecipientAddress {
        &self.shared.recipient
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// The background task's owned context
struct Lifecycle {
    shared: Arc<Shared>,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn CredentialStore>,
    config: SessionConfig,
    shutdown: watch::Receiver<bool>,
}

impl Lifecycle {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let credentials = self.load_credentials().await;
            let state = *self.shared.state.read();
            match (&credentials, state) {
                (None, _) => self.shared.transition(SessionState::Pairing),
                (Some(_), SessionState::Reconnecting) => {}
                (Some(_), _) => self.shared.transition(SessionState::Connecting),
            }

            match self.connect_once(credentials).await {
                ConnectionOutcome::Shutdown => break,
                ConnectionOutcome::Revoked => {
                    tracing::error!(
                        "Session revoked by the account owner; pair again to resume relaying"
                    );
                    if let Err(e) = self.store.clear().await {
                        tracing::warn!(error = %e, "Failed to clear revoked credentials");
                    }
                    self.shared.transition(SessionState::Closed);
                    self.shared.emit(SessionEvent::Revoked);
                    return;
                }
                ConnectionOutcome::Lost(reason) => {
                    tracing::warn!(reason = %reason, "Session lost, reconnecting");
                    failures = 0;
                }
                ConnectionOutcome::Failed => {
                    failures = failures.saturating_add(1);
                    if !self.config.transport.allows_attempt(failures) {
                        tracing::error!(
                            attempts = failures,
                            "Giving up on the session after repeated failures"
                        );
                        self.shared.transition(SessionState::Closed);
                        self.shared
                            .emit(SessionEvent::ReconnectExhausted { attempts: failures });
                        return;
                    }
                }
            }

            self.shared.transition(SessionState::Reconnecting);
            let delay = self.config.transport.backoff_for_attempt(failures);
            tracing::info!(
                attempt = failures + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Waiting before reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.shared.set_ready(None);
        self.shared.transition(SessionState::Closed);
        tracing::info!("Session lifecycle stopped");
    }

    async fn load_credentials(&self) -> Option<Credentials> {
        match self.store.load().await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!(error = %e, "Stored credentials unusable, pairing afresh");
                None
            }
        }
    }

    async fn connect_once(&mut self, credentials: Option<Credentials>) -> ConnectionOutcome {
        let pairing = credentials.is_none();
        let transport = self.factory.create();

        let connected = tokio::select! {
            result = transport.connect(credentials) => result,
            _ = self.shutdown.changed() => return ConnectionOutcome::Shutdown,
        };
        let events = match connected {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Connection attempt failed");
                return ConnectionOutcome::Failed;
            }
        };

        let outcome = self.drive(&transport, events, pairing).await;

        self.shared.set_ready(None);
        if let Err(e) = transport.disconnect().await {
            tracing::debug!(error = %e, "Adapter disconnect failed");
        }
        outcome
    }

    /// Relay one connection's events until it ends
    async fn drive(
        &mut self,
        transport: &Arc<dyn MessagingTransport>,
        mut events: mpsc::Receiver<TransportEvent>,
        pairing: bool,
    ) -> ConnectionOutcome {
        let open_timeout = if pairing {
            self.config.pairing_timeout
        } else {
            self.config.handshake_timeout
        };
        let deadline = Instant::now() + open_timeout;
        let mut opened = false;

        loop {
            let waiting = !opened;
            let expiry = async move {
                if !waiting {
                    std::future::pending::<()>().await;
                } else {
                    tokio::time::sleep_until(deadline).await;
                }
            };

            let event = tokio::select! {
                event = events.recv() => event,
                () = expiry => {
                    if pairing {
                        tracing::warn!(timeout_secs = open_timeout.as_secs(), "Pairing was not approved in time");
                    } else {
                        tracing::warn!(timeout_secs = open_timeout.as_secs(), "Session did not open in time");
                    }
                    return ConnectionOutcome::Failed;
                }
                _ = self.shutdown.changed() => return ConnectionOutcome::Shutdown,
            };

            match event {
                Some(TransportEvent::PairingCode(code)) => {
                    tracing::info!("New pairing challenge issued");
                    self.shared.emit(SessionEvent::PairingChallenge { code });
                }
                Some(TransportEvent::CredentialsUpdated(credentials)) => {
                    self.persist(&credentials).await;
                }
                Some(TransportEvent::Opened) => {
                    if !opened {
                        opened = true;
                        self.shared.set_ready(Some(Arc::clone(transport)));
                        self.shared.transition(SessionState::Ready);
                    }
                }
                Some(TransportEvent::Closed(reason)) => {
                    self.shared.set_ready(None);
                    return Self::classify(reason, opened);
                }
                None => {
                    self.shared.set_ready(None);
                    return Self::classify(DisconnectReason::ConnectionLost, opened);
                }
            }
        }
    }

    fn classify(reason: DisconnectReason, opened: bool) -> ConnectionOutcome {
        if reason.is_revocation() {
            ConnectionOutcome::Revoked
        } else if opened {
            ConnectionOutcome::Lost(reason)
        } else {
            tracing::warn!(reason = %reason, "Connection closed before the session opened");
            ConnectionOutcome::Failed
        }
    }

    async fn persist(&self, credentials: &Credentials) {
        match self.store.save(credentials).await {
            Ok(()) => tracing::debug!("Credentials persisted"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist credentials; continuing in memory");
                self.shared.emit(SessionEvent::PersistenceFailed {
                    error: e.to_string(),
                });
            }
        }
    }
}
