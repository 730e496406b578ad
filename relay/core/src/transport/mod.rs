//! Transport Layer for the Messaging Network
//!
//! Provides abstraction over how the relay reaches the messaging network:
//! - `InProcess`: Scriptable channel-backed network (embedded mode, tests)
//! - `Gateway`: Out-of-process protocol gateway over a Unix domain socket
//!
//! # Design Philosophy
//!
//! The wire protocol of the messaging network (handshake, encryption, media
//! upload) is not implemented here. The session manager only ever sees a
//! [`MessagingTransport`] that can connect, send, disconnect, and report
//! connection-state events. A [`TransportFactory`] hands out a fresh adapter
//! for every connection attempt.

pub mod config;
pub mod factory;
pub mod frame;
#[cfg(unix)]
pub mod gateway;
pub mod in_process;
pub mod traits;

// Re-exports for convenience
pub use config::{default_gateway_socket_path, runtime_dir, TransportConfig, TransportType};
pub use factory::create_transport_factory;
pub use frame::{read_frame, write_frame, FrameDecoder, MAX_FRAME_SIZE};
#[cfg(unix)]
pub use gateway::{GatewayCommand, GatewayEvent, GatewayFactory, GatewayTransport};
pub use in_process::{InProcessNetwork, InProcessTransport, SentMessage};
pub use traits::{
    Credentials, DisconnectReason, MessagingTransport, OutboundImage, RecipientAddress,
    TransportError, TransportEvent, TransportFactory,
};
