//! Transport Factory
//!
//! Builds the adapter factory the session manager connects through, based on
//! configuration.

use std::sync::Arc;

use super::{
    config::{default_gateway_socket_path, TransportConfig, TransportType},
    in_process::InProcessNetwork,
    traits::{TransportError, TransportFactory},
};

#[cfg(unix)]
use super::gateway::GatewayFactory;

/// Create a transport factory based on configuration
///
/// The in-process network has no address of its own, so the caller passes the
/// network it wants the session to use.
///
/// # Errors
///
/// Returns `TransportError::InvalidState` if:
/// - `InProcess` transport is requested without a network
/// - `Gateway` transport is requested on a platform without Unix sockets
///
/// # Example
///
/// ```ignore
/// use relay_core::transport::{create_transport_factory, TransportConfig};
///
/// let factory = create_transport_factory(&TransportConfig::gateway(), None)?;
/// let manager = SessionManager::new(factory, store, session_config);
/// ```
pub fn create_transport_factory(
    config: &TransportConfig,
    network: Option<InProcessNetwork>,
) -> Result<Arc<dyn TransportFactory>, TransportError> {
    match &config.transport {
        TransportType::InProcess => match network {
            Some(network) => Ok(Arc::new(network)),
            None => Err(TransportError::InvalidState(
                "InProcess transport requires an InProcessNetwork".into(),
            )),
        },

        #[cfg(unix)]
        TransportType::Gateway { socket_path } => {
            let path = socket_path
                .clone()
                .unwrap_or_else(default_gateway_socket_path);
            tracing::debug!(path = %path.display(), "Using protocol gateway transport");
            Ok(Arc::new(GatewayFactory::new(path, config)))
        }

        #[cfg(not(unix))]
        TransportType::Gateway { .. } => Err(TransportError::InvalidState(
            "Gateway transport requires Unix domain sockets".into(),
        )),
    }
}
