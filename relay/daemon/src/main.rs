//! Relay Daemon - Submission Relay Server
//!
//! Keeps the messaging session alive and relays form submissions handed over
//! by the HTTP layer on a local Unix socket to the configured recipient.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults
//! relay-daemon
//!
//! # Custom recipient and config file
//! relay-daemon --recipient 94714768679 --config /etc/submission-relay/relay.toml
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (in-flight submissions finish)

mod server;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use qrcode::render::unicode;
use qrcode::QrCode;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use relay_core::config::load_config_from_path;
use relay_core::transport::{create_transport_factory, runtime_dir};
use relay_core::{
    ConfigOverrides, FileCredentialStore, RelayConfig, SessionEvent, SessionManager,
    SubmissionService,
};

use server::IntakeServer;

/// Relay Daemon - relays form submissions to a messaging recipient
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Recipient phone number or full address
    #[arg(short = 'r', long, value_name = "NUMBER")]
    recipient: Option<String>,

    /// Unix socket path for the HTTP layer
    #[arg(short = 's', long, value_name = "PATH")]
    intake_socket: Option<PathBuf>,

    /// Unix socket path of the messaging gateway
    #[arg(short = 'g', long, value_name = "PATH")]
    gateway_socket: Option<PathBuf>,

    /// Directory holding the session credentials
    #[arg(long, value_name = "DIR")]
    credentials_dir: Option<PathBuf>,

    /// Seconds to wait for a pairing challenge to be scanned
    #[arg(long, value_name = "SECS")]
    pairing_timeout: Option<u64>,

    /// Milliseconds between photo messages
    #[arg(long, value_name = "MS")]
    send_delay_ms: Option<u64>,

    /// PID file path
    #[arg(long, env = "RELAY_PID_FILE", value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref recipient) = self.recipient {
            overrides = overrides.with_recipient(recipient.clone());
        }
        if let Some(ref path) = self.intake_socket {
            overrides = overrides.with_intake_socket(path.clone());
        }
        if let Some(ref path) = self.gateway_socket {
            overrides = overrides.with_gateway_socket(path.clone());
        }
        if let Some(ref dir) = self.credentials_dir {
            overrides = overrides.with_credentials_dir(dir.clone());
        }
        if let Some(secs) = self.pairing_timeout {
            overrides = overrides.with_pairing_timeout_secs(secs);
        }
        if let Some(ms) = self.send_delay_ms {
            overrides = overrides.with_send_delay_ms(ms);
        }
        overrides
    }
}

/// Get the default PID file path
fn default_pid_path() -> PathBuf {
    runtime_dir().join("relay.pid")
}

/// Write PID file
fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create PID directory: {parent:?}"))?;
    }

    let pid = std::process::id();
    let mut file =
        fs::File::create(path).with_context(|| format!("Failed to create PID file: {path:?}"))?;
    writeln!(file, "{pid}")?;

    info!(pid = pid, path = ?path, "PID file created");
    Ok(())
}

/// Remove PID file
fn remove_pid_file(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, path = ?path, "Failed to remove PID file");
        } else {
            info!(path = ?path, "PID file removed");
        }
    }
}

/// Refuse to start while another daemon owns the session
fn check_existing_daemon(pid_path: &Path) -> Result<()> {
    if !pid_path.exists() {
        return Ok(());
    }

    let pid_str = fs::read_to_string(pid_path)
        .with_context(|| format!("Failed to read PID file: {pid_path:?}"))?;

    let pid: i32 = pid_str
        .trim()
        .parse()
        .with_context(|| "Invalid PID in file")?;

    // Signal 0 only checks that the process exists
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        anyhow::bail!(
            "Another relay-daemon is already running (PID: {pid}). \
             Stop it first or remove {pid_path:?} if it's stale."
        );
    }

    warn!(pid = pid, "Removing stale PID file");
    fs::remove_file(pid_path)?;
    Ok(())
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Print the pairing challenge where the operator will see it
fn show_pairing_challenge(code: &str) {
    let rule = "=".repeat(60);
    info!("{rule}");
    info!("Scan this code from the messaging app on your phone:");
    info!("  Settings > Linked Devices > Link a Device");
    // Printed raw: log prefixes would break the code's rows
    match render_pairing_qr(code) {
        Ok(qr) => eprintln!("{qr}"),
        Err(e) => warn!(error = %e, "Could not render pairing QR code"),
    }
    info!("Pairing code: {code}");
    info!("{rule}");
}

/// Render a pairing code as a QR code made of half-block characters
fn render_pairing_qr(code: &str) -> Result<String> {
    let qr = QrCode::new(code.as_bytes()).context("Pairing code does not fit in a QR code")?;
    Ok(qr
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Surface session events to the operator
async fn watch_session(session: Arc<SessionManager>) {
    let mut events = session.subscribe();
    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged { from, to }) => {
                info!(from = %from, to = %to, "Session state changed");
            }
            Ok(SessionEvent::PairingChallenge { code }) => show_pairing_challenge(&code),
            Ok(SessionEvent::PersistenceFailed { error }) => {
                warn!(error = %error, "Session credentials could not be saved");
            }
            Ok(SessionEvent::Revoked) => {
                error!(
                    "This device was unlinked. Submissions will be refused until the relay \
                     is restarted and paired again."
                );
            }
            Ok(SessionEvent::ReconnectExhausted { attempts }) => {
                error!(
                    attempts,
                    "Could not reconnect to the messaging network. Submissions will be \
                     refused until the relay is restarted."
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session event watcher fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_config(config: &RelayConfig) {
    info!(source = ?config.source(), file = ?config.config_file_path, "Configuration loaded");
    info!(recipient = %config.recipient, "Recipient");
    info!(
        max_photos = config.limits.max_photos,
        max_photo_bytes = config.limits.max_photo_bytes,
        send_delay_ms = config.send_delay.as_millis(),
        "Submission limits"
    );
    info!(
        transport = ?config.transport.transport,
        credentials_dir = ?config.credentials_dir,
        "Session settings"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Relay Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let mut config = load_config_from_path(
        args.config
            .clone()
            .or_else(relay_core::config::default_config_path),
    )
    .context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;
    log_config(&config);

    let pid_path = args.pid_file.clone().unwrap_or_else(default_pid_path);
    check_existing_daemon(&pid_path)?;
    write_pid_file(&pid_path)?;

    // Setup signal handlers
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let shutdown_clone = Arc::clone(&shutdown);
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    // Session
    let factory = create_transport_factory(&config.transport, None)
        .context("Failed to create messaging transport")?;
    let store = Arc::new(FileCredentialStore::new(config.credentials_dir.clone()));
    let session = Arc::new(SessionManager::new(factory, store, config.session_config()));
    let watcher = tokio::spawn(watch_session(Arc::clone(&session)));
    session.start().context("Failed to start session manager")?;

    // Intake
    let service = Arc::new(SubmissionService::new(
        Arc::clone(&session),
        config.dispatcher(),
        config.limits,
    ));
    let mut server = IntakeServer::new(config.intake_socket.clone(), Arc::clone(&service));
    let result = server.run(shutdown).await;

    // Cleanup
    info!("Shutting down...");
    service.close().await;
    session.shutdown().await;
    watcher.abort();
    remove_pid_file(&pid_path);

    match result {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
