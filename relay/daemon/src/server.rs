//! Intake Server Implementation
//!
//! Accepts connections from the HTTP layer on a Unix socket and answers one
//! [`IntakeResponse`] per [`IntakeRequest`]:
//! - Accepts connections on a Unix socket (owner-only permissions)
//! - Rejects peers running as another user
//! - Spawns a handler task per connection
//! - Supports graceful shutdown
//!
//! ```text
//!   HTTP layer ──frame──▶ IntakeServer ──▶ SubmissionService ──▶ SessionManager
//!              ◀──frame──              ◀── receipt / error
//! ```

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use relay_core::transport::{read_frame, write_frame};
use relay_core::{IntakeRequest, IntakeResponse, SubmissionService, TransportError};

/// Identifies one intake connection in logs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state tracking
struct ConnectionState {
    /// When the connection was established
    connected_at: Instant,
    /// Remote peer UID (from SO_PEERCRED)
    peer_uid: Option<u32>,
    /// Handle to abort the connection task
    abort_handle: tokio::task::AbortHandle,
}

/// Configuration for the intake server
pub struct ServerConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// How often the accept loop checks the shutdown flag
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// The intake socket server
pub struct IntakeServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Where submissions go
    service: Arc<SubmissionService>,
    /// Server configuration
    server_config: ServerConfig,
    /// Active connection state (task handles, peer info)
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
}

impl IntakeServer {
    /// Create a server in front of a submission service
    pub fn new(socket_path: PathBuf, service: Arc<SubmissionService>) -> Self {
        Self {
            socket_path,
            service,
            server_config: ServerConfig::default(),
            connection_states: Arc::new(DashMap::new()),
        }
    }

    /// Get peer credentials from Unix socket
    #[cfg(target_os = "linux")]
    fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
        use std::os::unix::io::AsRawFd;

        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        let result = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                std::ptr::addr_of_mut!(cred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if result == 0 {
            Some(cred.uid)
        } else {
            None
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
        stream.peer_cred().ok().map(|cred| cred.uid())
    }

    /// Prepare the socket path (create directory, remove stale socket)
    fn prepare_socket(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
                info!(path = ?parent, "Created socket directory");
            }
        }

        if self.socket_path.exists() {
            warn!(path = ?self.socket_path, "Removing stale socket file");
            fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove stale socket: {:?}", self.socket_path)
            })?;
        }

        Ok(())
    }

    /// Accept connections until `shutdown` is set
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        self.prepare_socket()?;

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {:?}", self.socket_path))?;

        info!(path = ?self.socket_path, "Listening for intake connections");

        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.socket_path, perms)
                .await
                .with_context(|| format!("Failed to restrict {:?}", self.socket_path))?;
        }

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping accept loop");
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            let accept_result =
                tokio::time::timeout(self.server_config.poll_interval, listener.accept()).await;

            let stream = match accept_result {
                Ok(Ok((stream, _addr))) => stream,
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    continue;
                }
                Err(_) => continue,
            };

            if self.connection_states.len() >= self.server_config.max_connections {
                warn!("Connection limit reached, rejecting new connection");
                drop(stream);
                continue;
            }

            let peer_uid = Self::get_peer_uid(&stream);
            let our_uid = unsafe { libc::getuid() };
            if let Some(uid) = peer_uid {
                if uid != our_uid && uid != 0 {
                    warn!(
                        peer_uid = uid,
                        our_uid = our_uid,
                        "Rejecting connection from different user"
                    );
                    drop(stream);
                    continue;
                }
            }

            let conn_id = ConnectionId::new();
            info!(
                conn_id = %conn_id,
                peer_uid = ?peer_uid,
                active_connections = self.connection_states.len() + 1,
                "New connection accepted"
            );

            let task_handle = tokio::spawn(
                Self::handle_connection(
                    conn_id,
                    stream,
                    Arc::clone(&self.service),
                    Arc::clone(&self.connection_states),
                )
                .instrument(tracing::info_span!("connection", %conn_id)),
            );

            self.connection_states.insert(
                conn_id,
                ConnectionState {
                    connected_at: Instant::now(),
                    peer_uid,
                    abort_handle: task_handle.abort_handle(),
                },
            );
            // The handler may have finished before it was tracked
            if task_handle.is_finished() {
                self.connection_states.remove(&conn_id);
            }
        }

        self.shutdown().await
    }

    /// Serve requests on one connection until the peer hangs up
    async fn handle_connection(
        conn_id: ConnectionId,
        stream: UnixStream,
        service: Arc<SubmissionService>,
        connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
    ) {
        let (mut reader, mut writer) = stream.into_split();

        loop {
            let response = match read_frame::<_, IntakeRequest>(&mut reader).await {
                Ok(Some(request)) => Self::handle_request(&service, request).await,
                Ok(None) => {
                    debug!("Peer closed connection");
                    break;
                }
                Err(
                    e @ (TransportError::SerializationError(_)
                    | TransportError::ChecksumMismatch { .. }),
                ) => {
                    warn!(error = %e, "Malformed intake frame");
                    IntakeResponse::bad_request(e.to_string())
                }
                Err(e) => {
                    error!(error = %e, "Read error");
                    break;
                }
            };

            if let Err(e) = write_frame(&mut writer, &response).await {
                error!(error = %e, "Write error");
                break;
            }
        }

        if let Some((_, state)) = connection_states.remove(&conn_id) {
            debug!(
                peer_uid = ?state.peer_uid,
                uptime_ms = state.connected_at.elapsed().as_millis(),
                "Connection closed"
            );
        }

        info!(
            active_connections = connection_states.len(),
            "Connection handler finished"
        );
    }

    async fn handle_request(service: &SubmissionService, request: IntakeRequest) -> IntakeResponse {
        match request {
            IntakeRequest::Submit(form) => {
                debug!(photos = form.photos.len(), "Submission received");
                IntakeResponse::from(service.submit(form.into_raw()).await)
            }
            IntakeRequest::Health => IntakeResponse::from(service.session().health()),
        }
    }

    /// Graceful shutdown
    async fn shutdown(&mut self) -> Result<()> {
        info!("Stopping intake server");

        let conn_ids: Vec<ConnectionId> = self.connection_states.iter().map(|r| *r.key()).collect();
        for conn_id in conn_ids {
            if let Some((_, conn_state)) = self.connection_states.remove(&conn_id) {
                info!(conn_id = %conn_id, "Aborting connection");
                conn_state.abort_handle.abort();
            }
        }

        if self.socket_path.exists() {
            tokio::fs::remove_file(&self.socket_path)
                .await
                .with_context(|| format!("Failed to remove socket: {:?}", self.socket_path))?;
            info!(path = ?self.socket_path, "Socket file removed");
        }

        Ok(())
    }
}
