//! Submission Service
//!
//! The boundary the intake layer calls: validate, check readiness, dispatch,
//! and map the outcome to a response category.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

use super::dispatch::{DispatchFailure, DispatchResult, Dispatcher};
use super::model::{RawSubmission, SubmissionId};
use super::validate::{accept, check, FieldError, ValidationErrors, ValidationLimits};
use crate::session::{SessionError, SessionManager, SessionState};

/// Why a submission was not delivered
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// The input broke one or more rules
    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    /// No ready session, or the relay is shutting down
    #[error("Messaging service not ready (state: {state})")]
    NotReady {
        /// Session state at the time
        state: SessionState,
    },

    /// A send failed part-way
    #[error("Dispatch of {submission_id} failed at step {at_step}: {cause}")]
    DispatchFailed {
        /// Which submission
        submission_id: SubmissionId,
        /// 0 = summary text, k = photo k
        at_step: usize,
        /// What went wrong
        cause: DispatchFailure,
    },
}

impl SubmissionError {
    /// HTTP-style status category
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotReady { .. } => 503,
            Self::DispatchFailed { .. } => 500,
        }
    }

    /// Machine-readable reason
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::NotReady { .. } => "service_not_ready",
            Self::DispatchFailed { .. } => "dispatch_failed",
        }
    }

    /// Per-field errors (empty unless validation failed)
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation(errors) => errors.errors(),
            _ => &[],
        }
    }
}

/// Proof of delivery for one submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    /// Correlation id
    pub submission_id: SubmissionId,
    /// Messages sent (summary plus photos)
    pub delivered: usize,
}

/// Counts dispatches that are still running
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct InFlightGuard(Arc<InFlight>);

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Validates, gates on readiness, and dispatches submissions
pub struct SubmissionService {
    session: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    limits: ValidationLimits,
    closed: AtomicBool,
    in_flight: Arc<InFlight>,
}

impl SubmissionService {
    /// Create a service over a session manager
    #[must_use]
    pub fn new(session: Arc<SessionManager>, dispatcher: Dispatcher, limits: ValidationLimits) -> Self {
        Self {
            session,
            dispatcher: Arc::new(dispatcher),
            limits,
            closed: AtomicBool::new(false),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// The session this service sends through
    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Active limits
    #[must_use]
    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Relay one submission
    ///
    /// Photo sizes are checked against the uploaded files, not the declared
    /// values. The dispatch runs on its own task, so dropping this future
    /// does not cut a sequence short. Temporary uploads are released on
    /// every path.
    ///
    /// # Errors
    ///
    /// - `Validation` when any rule fails
    /// - `NotReady` when the session is not ready or the service is closed
    /// - `DispatchFailed` when a send fails part-way
    pub async fn submit(&self, mut raw: RawSubmission) -> Result<DispatchReceipt, SubmissionError> {
        let guard = self.in_flight.enter();
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("Rejecting submission during shutdown");
            raw.release_uploads().await;
            return Err(SubmissionError::NotReady {
                state: SessionState::Closed,
            });
        }

        raw.measure_uploads().await;
        if let Err(errors) = check(&raw, &self.limits) {
            tracing::info!(errors = %errors, "Submission rejected");
            raw.release_uploads().await;
            return Err(SubmissionError::Validation(errors));
        }
        let submission = accept(raw, &self.limits);
        let submission_id = submission.id();

        let handle = match self.session.acquire_ready_session() {
            Ok(handle) => handle,
            Err(e) => {
                let state = match e {
                    SessionError::NotReady { state } => state,
                    SessionError::AlreadyStarted => self.session.current_state(),
                };
                tracing::warn!(submission = %submission_id, state = %state, "Session not ready, rejecting submission");
                submission.release_uploads().await;
                return Err(SubmissionError::NotReady { state });
            }
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let task = tokio::spawn(async move {
            let _guard = guard;
            let result = dispatcher.dispatch(&submission, &handle).await;
            submission.release_uploads().await;
            result
        });

        match task.await {
            Ok(DispatchResult::AllDelivered { count }) => Ok(DispatchReceipt {
                submission_id,
                delivered: count,
            }),
            Ok(DispatchResult::Failed { at_step, cause }) => {
                tracing::error!(submission = %submission_id, at_step, cause = %cause, "Submission dispatch failed");
                Err(SubmissionError::DispatchFailed {
                    submission_id,
                    at_step,
                    cause,
                })
            }
            Err(e) => {
                tracing::error!(submission = %submission_id, error = %e, "Dispatch task failed");
                Err(SubmissionError::DispatchFailed {
                    submission_id,
                    at_step: 0,
                    cause: DispatchFailure::SendFailed(e.to_string()),
                })
            }
        }
    }

    /// Stop accepting submissions and wait for in-flight dispatches
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.in_flight.wait_idle().await;
        tracing::info!("Submission service closed");
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialStore, MemoryCredentialStore};
    use crate::session::SessionConfig;
    use crate::submission::dispatch::MessageTemplate;
    use crate::submission::model::RawPhoto;
    use crate::transport::{Credentials, InProcessNetwork, RecipientAddress, TransportConfig};
    use std::time::Duration;

    fn raw() -> RawSubmission {
        RawSubmission {
            first_name: "Ann".into(),
            last_name: "Lee".into(),
            contact_number: "+1 555-0100".into(),
            photos: vec![RawPhoto::from_bytes("p1.jpg", "image/jpeg", vec![1; 8])],
            ..RawSubmission::default()
        }
    }

    fn service(network: &InProcessNetwork, paired: bool) -> SubmissionService {
        let store: Arc<dyn CredentialStore> = if paired {
            Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
                serde_json::json!("paired"),
            )))
        } else {
            Arc::new(MemoryCredentialStore::new())
        };
        let config = SessionConfig {
            transport: TransportConfig::for_testing(),
            ..SessionConfig::new(RecipientAddress::new("15550100"))
        };
        let manager = Arc::new(SessionManager::new(Arc::new(network.clone()), store, config));
        SubmissionService::new(
            manager,
            Dispatcher::new(MessageTemplate::default(), Duration::ZERO),
            ValidationLimits::default(),
        )
    }

    async fn until_ready(service: &SubmissionService) {
        for _ in 0..100 {
            if service.session().current_state() == SessionState::Ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("session never became ready");
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_delivers() {
        let network = InProcessNetwork::new();
        let service = service(&network, true);
        service.session().start().unwrap();
        until_ready(&service).await;

        let receipt = service.submit(raw()).await.unwrap();
        assert_eq!(receipt.delivered, 2);
        assert_eq!(network.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_before_readiness() {
        let network = InProcessNetwork::new();
        let service = service(&network, false);

        let bad = RawSubmission {
            first_name: String::new(),
            ..raw()
        };
        let err = service.submit(bad).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.reason(), "validation_failed");
        assert_eq!(err.field_errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_while_pairing() {
        let network = InProcessNetwork::new();
        let service = service(&network, false);
        service.session().start().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = service.submit(raw()).await.unwrap_err();
        assert_eq!(
            err,
            SubmissionError::NotReady {
                state: SessionState::Pairing
            }
        );
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.reason(), "service_not_ready");
        assert!(network.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_failure_maps_to_500() {
        let network = InProcessNetwork::new();
        let service = service(&network, true);
        service.session().start().unwrap();
        until_ready(&service).await;
        network.fail_send_at(1);

        let err = service.submit(raw()).await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::DispatchFailed { at_step: 1, .. }
        ));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.reason(), "dispatch_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_service_rejects() {
        let network = InProcessNetwork::new();
        let service = service(&network, true);
        service.session().start().unwrap();
        until_ready(&service).await;

        service.close().await;
        assert!(service.is_closed());
        let err = service.submit(raw()).await.unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert!(network.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_photo_size_taken_from_upload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("upload-1");
        std::fs::write(&path, vec![0u8; 6 * 1024 * 1024]).unwrap();

        let network = InProcessNetwork::new();
        let service = service(&network, false);
        let raw = RawSubmission {
            photos: vec![RawPhoto::from_temp_file(&path, "big.jpg", "image/jpeg", 10)],
            ..raw()
        };

        let err = service.submit(raw).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.field_errors().len(), 1);
        assert_eq!(err.field_errors()[0].field, crate::submission::Field::Photo(0));
        assert!(!path.exists());
        assert!(network.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_does_not_cut_sequence() {
        let network = InProcessNetwork::new();
        network.set_send_latency(Duration::from_millis(100));
        let service = Arc::new(service(&network, true));
        service.session().start().unwrap();
        until_ready(&service).await;

        let submit = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.submit(raw()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        submit.abort();

        service.close().await;
        assert_eq!(network.sent().len(), 2);
    }
}
