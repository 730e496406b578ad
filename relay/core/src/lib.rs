//! Relay Core - Session Lifecycle and Submission Dispatch
//!
//! This crate relays application submissions (a few personal fields plus up
//! to four photos) to one fixed recipient over a long-lived messaging-network
//! session. It owns the session and the dispatch pipeline; the HTTP layer and
//! the network's wire protocol stay outside.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 HTTP layer (outside this crate)                  │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                │ IntakeRequest / IntakeResponse
//! ┌──────────────────────────────┼───────────────────────────────────┐
//! │                         RELAY CORE                               │
//! │  ┌───────────────────────────┴──────────────────────────────┐    │
//! │  │                   SubmissionService                      │    │
//! │  │   validate ──► acquire_ready_session ──► Dispatcher      │    │
//! │  └───────────────────────────┬──────────────────────────────┘    │
//! │                              │ SessionHandle (outbound gate)     │
//! │  ┌───────────────────────────┴──────────────────────────────┐    │
//! │  │                    SessionManager                        │    │
//! │  │  ┌────────────────┐  ┌──────────────┐  ┌──────────────┐  │    │
//! │  │  │ State machine  │  │ Credential   │  │ SessionEvent │  │    │
//! │  │  │ + reconnect    │  │ Store        │  │ broadcast    │  │    │
//! │  │  └────────────────┘  └──────────────┘  └──────────────┘  │    │
//! │  └───────────────────────────┬──────────────────────────────┘    │
//! └──────────────────────────────┼───────────────────────────────────┘
//!                                │ MessagingTransport
//!                  ┌─────────────┴─────────────┐
//!                  │ GatewayTransport (socket) │
//!                  │ InProcessTransport        │
//!                  └───────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`SessionManager`]: Owns the connection, pairing, and reconnection
//! - [`SessionHandle`]: What the dispatcher sends through
//! - [`SubmissionService`]: Validate, check readiness, dispatch
//! - [`Dispatcher`]: Summary text then photos, in order
//! - [`RelayConfig`]: Layered configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{
//!     config::load_config,
//!     credentials::FileCredentialStore,
//!     transport::create_transport_factory,
//!     SessionManager, SubmissionService,
//! };
//!
//! let config = load_config()?;
//! let factory = create_transport_factory(&config.transport, None)?;
//! let store = Arc::new(FileCredentialStore::new(&config.credentials_dir));
//!
//! let session = Arc::new(SessionManager::new(factory, store, config.session_config()));
//! session.start()?;
//!
//! let service = SubmissionService::new(session, config.dispatcher(), config.limits);
//! let receipt = service.submit(raw_submission).await?;
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: TOML, environment, and CLI configuration layering
//! - [`credentials`]: Credential persistence
//! - [`events`]: Session notifications
//! - [`messages`]: Intake socket wire types
//! - [`session`]: Session state machine and manager
//! - [`submission`]: Validation, dispatch, and the boundary service
//! - [`transport`]: Messaging-network adapters and the frame codec

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credentials;
pub mod events;
pub mod messages;
pub mod session;
pub mod submission;
pub mod transport;

// Re-exports for convenience
pub use config::{load_config, ConfigError, ConfigOverrides, ConfigSource, RelayConfig};
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore, PersistenceError};
pub use events::SessionEvent;
pub use messages::{IntakeRequest, IntakeResponse, SubmissionForm, UploadedPhoto};
pub use session::{
    HealthSnapshot, OutboundSequence, SessionConfig, SessionError, SessionHandle, SessionManager,
    SessionState,
};
pub use submission::{
    validate, DispatchFailure, DispatchReceipt, DispatchResult, Dispatcher, MessageTemplate,
    RawPhoto, RawSubmission, Submission, SubmissionError, SubmissionService, ValidationErrors,
    ValidationLimits,
};
pub use transport::{
    Credentials, DisconnectReason, MessagingTransport, RecipientAddress, TransportConfig,
    TransportError, TransportEvent, TransportFactory,
};
