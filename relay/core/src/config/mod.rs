//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, supporting a TOML file at
//! `~/.config/submission-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the daemon through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [recipient]
//! address = "94714768679"
//!
//! [http]
//! port = 5000
//!
//! [limits]
//! max_photo_bytes = 5242880
//! max_photos = 4
//!
//! [dispatch]
//! send_delay_ms = 500
//! header = "🌟 *RECRUITMENT APPLICATION* 🌟"
//! footer = "✅ Application received via Submission Relay"
//!
//! [session]
//! pairing_timeout_secs = 120
//! credentials_dir = "/var/lib/submission-relay/auth"
//!
//! [transport]
//! gateway_socket = "/run/user/1000/submission-relay/gateway.sock"
//! reconnect_attempts = 10
//! reconnect_delay_ms = 1000
//! max_reconnect_delay_ms = 60000
//!
//! [intake]
//! socket_path = "/run/user/1000/submission-relay/intake.sock"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::default_credentials_dir;
use crate::session::SessionConfig;
use crate::submission::{Dispatcher, MessageTemplate, ValidationLimits};
use crate::transport::config::{runtime_dir, TransportConfig, TransportType};
use crate::transport::RecipientAddress;

/// Recipient used when none is configured
pub const DEFAULT_RECIPIENT: &str = "94714768679";

/// Port of the HTTP layer when none is configured
pub const DEFAULT_HTTP_PORT: u16 = 5000;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[recipient]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipientToml {
    /// Phone number or full network address
    pub address: Option<String>,
}

/// `[http]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpToml {
    /// Listening port of the HTTP layer
    pub port: Option<u16>,
}

/// `[limits]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Largest accepted photo in bytes
    pub max_photo_bytes: Option<u64>,
    /// Most photos per submission
    pub max_photos: Option<usize>,
}

/// `[dispatch]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchToml {
    /// Pause between photos in milliseconds
    pub send_delay_ms: Option<u64>,
    /// Summary header line
    pub header: Option<String>,
    /// Summary footer line
    pub footer: Option<String>,
}

/// `[session]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// How long a pairing challenge may stay unanswered
    pub pairing_timeout_secs: Option<u64>,
    /// How long a credentialed connect may take to open
    pub handshake_timeout_secs: Option<u64>,
    /// Where credentials are stored
    pub credentials_dir: Option<String>,
}

/// `[transport]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// Protocol gateway socket path
    pub gateway_socket: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Per-send acknowledgement timeout in milliseconds
    pub send_timeout_ms: Option<u64>,
    /// Consecutive failed attempts before giving up (0 = unlimited)
    pub reconnect_attempts: Option<u32>,
    /// Initial reconnection delay in milliseconds
    pub reconnect_delay_ms: Option<u64>,
    /// Reconnection delay cap in milliseconds
    pub max_reconnect_delay_ms: Option<u64>,
}

/// `[intake]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeToml {
    /// Intake socket path
    pub socket_path: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Recipient section
    pub recipient: RecipientToml,
    /// HTTP layer section
    pub http: HttpToml,
    /// Validation limits section
    pub limits: LimitsToml,
    /// Dispatch section
    pub dispatch: DispatchToml,
    /// Session section
    pub session: SessionToml,
    /// Transport section
    pub transport: TransportToml,
    /// Intake socket section
    pub intake: IntakeToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the relay
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Fixed destination of every submission
    pub recipient: RecipientAddress,

    /// Listening port of the HTTP layer (carried, not used by the core)
    pub http_port: u16,

    /// Validation limits
    pub limits: ValidationLimits,

    /// Pause between photos
    pub send_delay: Duration,

    /// Summary header and footer
    pub template: MessageTemplate,

    /// Pairing timeout
    pub pairing_timeout: Duration,

    /// Handshake timeout for credentialed connects
    pub handshake_timeout: Duration,

    /// Credential store directory
    pub credentials_dir: PathBuf,

    /// Transport selection and reconnection policy
    pub transport: TransportConfig,

    /// Intake socket path
    pub intake_socket: PathBuf,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            recipient: RecipientAddress::new(DEFAULT_RECIPIENT),
            http_port: DEFAULT_HTTP_PORT,
            limits: ValidationLimits::default(),
            send_delay: Duration::from_millis(500),
            template: MessageTemplate::default(),
            pairing_timeout: Duration::from_secs(120),
            handshake_timeout: Duration::from_secs(30),
            credentials_dir: default_credentials_dir(),
            transport: TransportConfig::gateway(),
            intake_socket: default_intake_socket_path(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Settings for the session manager
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            recipient: self.recipient.clone(),
            pairing_timeout: self.pairing_timeout,
            handshake_timeout: self.handshake_timeout,
            transport: self.transport.clone(),
        }
    }

    /// A dispatcher with the configured template and pacing
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.template.clone(), self.send_delay)
    }

    /// Check values that would make the relay unusable
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_photos == 0 {
            return Err(ConfigError::ValidationError(
                "max_photos must be at least 1".into(),
            ));
        }
        if self.limits.max_photo_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_photo_bytes must be at least 1".into(),
            ));
        }
        if self.pairing_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "pairing_timeout_secs must be at least 1".into(),
            ));
        }
        if self.transport.reconnect_delay_ms > self.transport.max_reconnect_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "reconnect_delay_ms ({}) exceeds max_reconnect_delay_ms ({})",
                self.transport.reconnect_delay_ms, self.transport.max_reconnect_delay_ms
            )));
        }
        if self.recipient.as_str().starts_with('@') {
            return Err(ConfigError::ValidationError(
                "recipient address has no number".into(),
            ));
        }
        Ok(())
    }

    fn set_gateway_socket(&mut self, path: PathBuf) {
        self.transport.transport = TransportType::Gateway {
            socket_path: Some(path),
        };
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/submission-relay/relay.toml` or
/// `~/.config/submission-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("submission-relay").join("relay.toml"))
}

/// Default intake socket path
#[must_use]
pub fn default_intake_socket_path() -> PathBuf {
    runtime_dir().join("intake.sock")
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// merged values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the merged values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Start with defaults
    let mut config = RelayConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config, &env);

    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) {
    if let Some(ref address) = toml.recipient.address {
        config.recipient = RecipientAddress::new(address);
    }
    if let Some(port) = toml.http.port {
        config.http_port = port;
    }

    // Limits
    if let Some(bytes) = toml.limits.max_photo_bytes {
        config.limits.max_photo_bytes = bytes;
    }
    if let Some(count) = toml.limits.max_photos {
        config.limits.max_photos = count;
    }

    // Dispatch
    if let Some(delay) = toml.dispatch.send_delay_ms {
        config.send_delay = Duration::from_millis(delay);
    }
    if let Some(ref header) = toml.dispatch.header {
        config.template.header.clone_from(header);
    }
    if let Some(ref footer) = toml.dispatch.footer {
        config.template.footer.clone_from(footer);
    }

    // Session
    if let Some(secs) = toml.session.pairing_timeout_secs {
        config.pairing_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.session.handshake_timeout_secs {
        config.handshake_timeout = Duration::from_secs(secs);
    }
    if let Some(ref dir) = toml.session.credentials_dir {
        config.credentials_dir = PathBuf::from(dir);
    }

    // Transport
    if let Some(ref socket) = toml.transport.gateway_socket {
        config.set_gateway_socket(PathBuf::from(socket));
    }
    if let Some(timeout) = toml.transport.connect_timeout_ms {
        config.transport.connect_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.transport.send_timeout_ms {
        config.transport.send_timeout_ms = timeout;
    }
    if let Some(attempts) = toml.transport.reconnect_attempts {
        config.transport.reconnect_attempts = attempts;
    }
    if let Some(delay) = toml.transport.reconnect_delay_ms {
        config.transport.reconnect_delay_ms = delay;
    }
    if let Some(delay) = toml.transport.max_reconnect_delay_ms {
        config.transport.max_reconnect_delay_ms = delay;
    }

    // Intake
    if let Some(ref socket) = toml.intake.socket_path {
        config.intake_socket = PathBuf::from(socket);
    }
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut RelayConfig, env: &impl Fn(&str) -> Option<String>) {
    // RELAY_RECIPIENT wins over the legacy name
    if let Some(recipient) = env("RELAY_RECIPIENT").or_else(|| env("WHATSAPP_RECIPIENT")) {
        config.recipient = RecipientAddress::new(&recipient);
        config.source = ConfigSource::Env;
    }
    if let Some(port) = parse_env::<u16>(env, "RELAY_PORT").or_else(|| parse_env(env, "PORT")) {
        config.http_port = port;
        config.source = ConfigSource::Env;
    }

    if let Some(bytes) = parse_env(env, "RELAY_MAX_PHOTO_BYTES") {
        config.limits.max_photo_bytes = bytes;
        config.source = ConfigSource::Env;
    }
    if let Some(count) = parse_env(env, "RELAY_MAX_PHOTOS") {
        config.limits.max_photos = count;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parse_env(env, "RELAY_SEND_DELAY_MS") {
        config.send_delay = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }

    if let Some(secs) = parse_env(env, "RELAY_PAIRING_TIMEOUT") {
        config.pairing_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = env("RELAY_CREDENTIALS_DIR") {
        config.credentials_dir = PathBuf::from(dir);
        config.source = ConfigSource::Env;
    }

    if let Some(socket) = env("RELAY_GATEWAY_SOCKET") {
        config.set_gateway_socket(PathBuf::from(socket));
        config.source = ConfigSource::Env;
    }
    if let Some(attempts) = parse_env(env, "RELAY_RECONNECT_ATTEMPTS") {
        config.transport.reconnect_attempts = attempts;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parse_env(env, "RELAY_RECONNECT_DELAY") {
        config.transport.reconnect_delay_ms = ms;
        config.source = ConfigSource::Env;
    }

    if let Some(socket) = env("RELAY_INTAKE_SOCKET") {
        config.intake_socket = PathBuf::from(socket);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Recipient override
    pub recipient: Option<String>,

    /// Intake socket override
    pub intake_socket: Option<PathBuf>,

    /// Gateway socket override
    pub gateway_socket: Option<PathBuf>,

    /// Credentials directory override
    pub credentials_dir: Option<PathBuf>,

    /// Pairing timeout override (seconds)
    pub pairing_timeout_secs: Option<u64>,

    /// Photo send delay override (milliseconds)
    pub send_delay_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set recipient override
    #[must_use]
    pub fn with_recipient(mut self, recipient: String) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// Set intake socket override
    #[must_use]
    pub fn with_intake_socket(mut self, path: PathBuf) -> Self {
        self.intake_socket = Some(path);
        self
    }

    /// Set gateway socket override
    #[must_use]
    pub fn with_gateway_socket(mut self, path: PathBuf) -> Self {
        self.gateway_socket = Some(path);
        self
    }

    /// Set credentials directory override
    #[must_use]
    pub fn with_credentials_dir(mut self, dir: PathBuf) -> Self {
        self.credentials_dir = Some(dir);
        self
    }

    /// Set pairing timeout override
    #[must_use]
    pub fn with_pairing_timeout_secs(mut self, secs: u64) -> Self {
        self.pairing_timeout_secs = Some(secs);
        self
    }

    /// Set send delay override
    #[must_use]
    pub fn with_send_delay_ms(mut self, ms: u64) -> Self {
        self.send_delay_ms = Some(ms);
        self
    }

    fn is_empty(&self) -> bool {
        self.recipient.is_none()
            && self.intake_socket.is_none()
            && self.gateway_socket.is_none()
            && self.credentials_dir.is_none()
            && self.pairing_timeout_secs.is_none()
            && self.send_delay_ms.is_none()
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` if an override makes the config invalid.
    pub fn apply(&self, config: &mut RelayConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        config.source = ConfigSource::Cli;

        if let Some(ref recipient) = self.recipient {
            config.recipient = RecipientAddress::new(recipient);
        }
        if let Some(ref path) = self.intake_socket {
            config.intake_socket.clone_from(path);
        }
        if let Some(ref path) = self.gateway_socket {
            config.set_gateway_socket(path.clone());
        }
        if let Some(ref dir) = self.credentials_dir {
            config.credentials_dir.clone_from(dir);
        }
        if let Some(secs) = self.pairing_timeout_secs {
            config.pairing_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.send_delay_ms {
            config.send_delay = Duration::from_millis(ms);
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
