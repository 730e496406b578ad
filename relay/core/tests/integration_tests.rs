//! Integration tests for the submission relay
//!
//! These tests drive the public API end to end over the in-process network:
//! - A form submission relayed as one summary plus its photos
//! - Ordering and partial failure of a dispatch sequence
//! - Readiness gating across session states
//! - Recovery from transient disconnects, and revocation
//! - Credential reuse across restarts
//! - Cleanup of temporary uploads

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

use relay_core::transport::{InProcessNetwork, OutboundImage, SentMessage};
use relay_core::{
    CredentialStore, Credentials, DisconnectReason, Dispatcher, FileCredentialStore,
    MemoryCredentialStore, MessageTemplate, MessagingTransport, RawPhoto, RawSubmission,
    RecipientAddress, SessionConfig, SessionManager, SessionState, SubmissionError,
    SubmissionService, TransportConfig, TransportError, TransportEvent, TransportFactory,
    ValidationLimits,
};

// =============================================================================
// Helpers
// =============================================================================

fn paired() -> Credentials {
    Credentials::new(json!({"device": "relay-1"}))
}

fn session_config(transport: TransportConfig) -> SessionConfig {
    SessionConfig {
        transport,
        ..SessionConfig::new(RecipientAddress::new("94714768679"))
    }
}

fn service_over(
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn CredentialStore>,
    transport: TransportConfig,
) -> Arc<SubmissionService> {
    let session = Arc::new(SessionManager::new(
        factory,
        store,
        session_config(transport),
    ));
    Arc::new(SubmissionService::new(
        session,
        Dispatcher::new(MessageTemplate::default(), Duration::ZERO),
        ValidationLimits::default(),
    ))
}

fn paired_service(network: &InProcessNetwork) -> Arc<SubmissionService> {
    service_over(
        Arc::new(network.clone()),
        Arc::new(MemoryCredentialStore::with_credentials(paired())),
        TransportConfig::for_testing(),
    )
}

async fn wait_for_state(session: &SessionManager, state: SessionState) {
    for _ in 0..2000 {
        if session.current_state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!(
        "session stuck in {} waiting for {state}",
        session.current_state()
    );
}

fn photo(name: &str) -> RawPhoto {
    RawPhoto::from_bytes(name, "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0])
}

fn submission(first: &str, last: &str, photos: usize) -> RawSubmission {
    RawSubmission {
        first_name: first.into(),
        last_name: last.into(),
        contact_number: "0771234567".into(),
        photos: (0..photos).map(|i| photo(&format!("p{i}.jpg"))).collect(),
        ..RawSubmission::default()
    }
}

fn temp_upload(dir: &Path, name: &str) -> (PathBuf, RawPhoto) {
    let path = dir.join(name);
    std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();
    let raw = RawPhoto::from_temp_file(&path, name, "image/png", 4);
    (path, raw)
}

/// Adapter that accepts the connection but never opens the session
struct StallingTransport {
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

#[async_trait]
impl MessagingTransport for StallingTransport {
    async fn connect(
        &self,
        _credentials: Option<Credentials>,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(4);
        *self.events.lock() = Some(tx);
        Ok(rx)
    }

    async fn send_text(&self, _to: &RecipientAddress, _text: &str) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn send_image(
        &self,
        _to: &RecipientAddress,
        _image: OutboundImage,
    ) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.events.lock().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }
}

struct StallingFactory;

impl TransportFactory for StallingFactory {
    fn create(&self) -> Arc<dyn MessagingTransport> {
        Arc::new(StallingTransport {
            events: Mutex::new(None),
        })
    }
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_application_relayed_end_to_end() {
    let dir = TempDir::new().unwrap();
    let network = InProcessNetwork::new();
    let service = paired_service(&network);
    service.session().start().unwrap();
    wait_for_state(service.session(), SessionState::Ready).await;

    let (path, upload) = temp_upload(dir.path(), "p1.png");
    let raw = RawSubmission {
        first_name: "Ann".into(),
        last_name: "Lee".into(),
        contact_number: "+1 555-0100".into(),
        photos: vec![upload],
        ..RawSubmission::default()
    };

    let receipt = service.submit(raw).await.unwrap();
    assert_eq!(receipt.delivered, 2);

    let sent = network.sent();
    assert_eq!(sent.len(), 2);

    let text = sent[0].text().unwrap();
    assert!(text.contains("• *Name:* Ann Lee"));
    assert!(text.contains("• *Contact:* +1 555-0100"));
    assert!(!text.contains("Nickname"));
    assert!(!text.contains("Additional Details"));
    assert!(text.contains("📸 *Photos:* 1 attached"));

    assert!(matches!(
        &sent[1],
        SentMessage::Image { mime_type, size, .. } if mime_type == "image/png" && *size == 4
    ));
    assert_eq!(sent[1].caption(), Some("📸 Photo 1 - Ann Lee"));
    for message in &sent {
        let (SentMessage::Text { to, .. } | SentMessage::Image { to, .. }) = message;
        assert_eq!(to.as_str(), "94714768679@s.whatsapp.net");
    }

    assert!(!path.exists());
}

#[tokio::test(start_paused = true)]
async fn test_photos_follow_summary_in_order() {
    let network = InProcessNetwork::new();
    let service = paired_service(&network);
    service.session().start().unwrap();
    wait_for_state(service.session(), SessionState::Ready).await;

    service.submit(submission("Ann", "Lee", 3)).await.unwrap();

    let sent = network.sent();
    assert_eq!(sent.len(), 4);
    assert!(sent[0].text().is_some());
    let captions: Vec<_> = sent[1..].iter().filter_map(SentMessage::caption).collect();
    assert_eq!(
        captions,
        vec![
            "📸 Photo 1 - Ann Lee",
            "📸 Photo 2 - Ann Lee",
            "📸 Photo 3 - Ann Lee"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_second_photo_stops_sequence() {
    let network = InProcessNetwork::new();
    let service = paired_service(&network);
    service.session().start().unwrap();
    wait_for_state(service.session(), SessionState::Ready).await;

    // Sends are counted text = 0, photo 1 = 1, photo 2 = 2
    network.fail_send_at(2);
    let err = service.submit(submission("Ann", "Lee", 3)).await.unwrap_err();

    assert!(matches!(
        err,
        SubmissionError::DispatchFailed { at_step: 2, .. }
    ));
    assert_eq!(network.sent().len(), 2);
    assert_eq!(network.send_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_submissions_do_not_interleave() {
    let network = InProcessNetwork::new();
    network.set_send_latency(Duration::from_millis(10));
    let service = paired_service(&network);
    service.session().start().unwrap();
    wait_for_state(service.session(), SessionState::Ready).await;

    let first = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.submit(submission("Ann", "Lee", 2)).await })
    };
    let second = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.submit(submission("Bob", "Ray", 2)).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let sent = network.sent();
    assert_eq!(sent.len(), 6);
    for block in sent.chunks(3) {
        let name = if block[0].text().unwrap().contains("Ann Lee") {
            "Ann Lee"
        } else {
            "Bob Ray"
        };
        assert!(block[1].caption().unwrap().ends_with(name));
        assert!(block[2].caption().unwrap().ends_with(name));
    }
}

// =============================================================================
// Readiness
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_not_ready_while_connecting() {
    let service = service_over(
        Arc::new(StallingFactory),
        Arc::new(MemoryCredentialStore::with_credentials(paired())),
        TransportConfig::for_testing(),
    );
    service.session().start().unwrap();
    wait_for_state(service.session(), SessionState::Connecting).await;

    assert!(service.session().acquire_ready_session().is_err());
    let err = service.submit(submission("Ann", "Lee", 1)).await.unwrap_err();
    assert_eq!(
        err,
        SubmissionError::NotReady {
            state: SessionState::Connecting
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_disconnect_recovers() {
    let network = InProcessNetwork::new();
    let transport = TransportConfig {
        reconnect_attempts: 0,
        reconnect_delay_ms: 1_000,
        max_reconnect_delay_ms: 1_000,
        ..TransportConfig::for_testing()
    };
    let service = service_over(
        Arc::new(network.clone()),
        Arc::new(MemoryCredentialStore::with_credentials(paired())),
        transport,
    );
    service.session().start().unwrap();
    wait_for_state(service.session(), SessionState::Ready).await;

    network.drop_connection(DisconnectReason::ConnectionLost);
    wait_for_state(service.session(), SessionState::Reconnecting).await;

    let err = service.submit(submission("Ann", "Lee", 1)).await.unwrap_err();
    assert_eq!(
        err,
        SubmissionError::NotReady {
            state: SessionState::Reconnecting
        }
    );
    assert!(network.sent().is_empty());

    wait_for_state(service.session(), SessionState::Ready).await;
    assert_eq!(network.connect_count(), 2);
    assert_eq!(network.connect_credentials()[1], Some(paired()));

    service.submit(submission("Ann", "Lee", 1)).await.unwrap();
    assert_eq!(network.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_revocation_closes_for_good() {
    let network = InProcessNetwork::new();
    let store = Arc::new(MemoryCredentialStore::with_credentials(paired()));
    let service = service_over(
        Arc::new(network.clone()),
        Arc::clone(&store) as Arc<dyn CredentialStore>,
        TransportConfig::for_testing(),
    );
    let mut events = service.session().subscribe();
    service.session().start().unwrap();
    wait_for_state(service.session(), SessionState::Ready).await;

    network.drop_connection(DisconnectReason::LoggedOut);
    wait_for_state(service.session(), SessionState::Closed).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(network.connect_count(), 1);
    assert_eq!(store.current(), None);

    let mut revoked = false;
    while let Ok(event) = events.try_recv() {
        revoked |= event == relay_core::SessionEvent::Revoked;
    }
    assert!(revoked);

    let err = service.submit(submission("Ann", "Lee", 1)).await.unwrap_err();
    assert_eq!(err.status_code(), 503);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_paired_session_survives_restart() {
    let dir = TempDir::new().unwrap();
    let network = InProcessNetwork::new();

    let first = SessionManager::new(
        Arc::new(network.clone()),
        Arc::new(FileCredentialStore::new(dir.path())),
        session_config(TransportConfig::for_testing()),
    );
    first.start().unwrap();
    wait_for_state(&first, SessionState::Pairing).await;
    assert!(network.approve_pairing(paired()));
    wait_for_state(&first, SessionState::Ready).await;
    first.shutdown().await;

    let on_disk = FileCredentialStore::new(dir.path()).load().await.unwrap();
    assert_eq!(on_disk, Some(paired()));

    let second = SessionManager::new(
        Arc::new(network.clone()),
        Arc::new(FileCredentialStore::new(dir.path())),
        session_config(TransportConfig::for_testing()),
    );
    second.start().unwrap();
    wait_for_state(&second, SessionState::Ready).await;

    let connects = network.connect_credentials();
    assert_eq!(connects.first(), Some(&None));
    assert_eq!(connects.last(), Some(&Some(paired())));
    second.shutdown().await;
}

// =============================================================================
// Temporary uploads
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_uploads_removed_on_every_path() {
    let dir = TempDir::new().unwrap();
    let network = InProcessNetwork::new();
    let service = paired_service(&network);

    // Validation failure
    let (invalid, upload) = temp_upload(dir.path(), "a.png");
    let raw = RawSubmission {
        first_name: String::new(),
        photos: vec![upload],
        ..submission("Ann", "Lee", 0)
    };
    assert_eq!(service.submit(raw).await.unwrap_err().status_code(), 400);
    assert!(!invalid.exists());

    // Not ready
    let (early, upload) = temp_upload(dir.path(), "b.png");
    let raw = RawSubmission {
        photos: vec![upload],
        ..submission("Ann", "Lee", 0)
    };
    assert_eq!(service.submit(raw).await.unwrap_err().status_code(), 503);
    assert!(!early.exists());

    service.session().start().unwrap();
    wait_for_state(service.session(), SessionState::Ready).await;

    // Dispatch failure before the photo is sent
    network.fail_send_at(0);
    let (failed, upload) = temp_upload(dir.path(), "c.png");
    let raw = RawSubmission {
        photos: vec![upload],
        ..submission("Ann", "Lee", 0)
    };
    assert_eq!(service.submit(raw).await.unwrap_err().status_code(), 500);
    assert!(!failed.exists());

    // Success
    let (delivered, upload) = temp_upload(dir.path(), "d.png");
    let raw = RawSubmission {
        photos: vec![upload],
        ..submission("Ann", "Lee", 0)
    };
    service.submit(raw).await.unwrap();
    assert!(!delivered.exists());
}

#[tokio::test(start_paused = true)]
async fn test_understated_upload_size_rejected() {
    let dir = TempDir::new().unwrap();
    let network = InProcessNetwork::new();
    let service = paired_service(&network);
    service.session().start().unwrap();
    wait_for_state(service.session(), SessionState::Ready).await;

    let path = dir.path().join("big.jpg");
    std::fs::write(&path, vec![0xFF; 6 * 1024 * 1024]).unwrap();
    let raw = RawSubmission {
        photos: vec![RawPhoto::from_temp_file(&path, "big.jpg", "image/jpeg", 10)],
        ..submission("Ann", "Lee", 0)
    };

    let err = service.submit(raw).await.unwrap_err();
    assert!(matches!(err, SubmissionError::Validation(_)));
    assert!(err.field_errors()[0].message.contains("6291456 bytes"));
    assert!(network.sent().is_empty());
    assert!(!path.exists());
}
