//! Credential Store
//!
//! Persists the pairing credentials so a restart does not force the account
//! owner to pair again. There is exactly one session, so there is exactly one
//! credential blob and no key.
//!
//! # Storage
//!
//! ```text
//! $XDG_DATA_HOME/submission-relay/auth/
//! └── creds.json        (mode 0600, replaced atomically)
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::transport::Credentials;

/// File name of the credential blob inside the credentials directory
pub const CREDENTIALS_FILE: &str = "creds.json";

/// Errors reading or writing credentials
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure
    #[error("Credential store IO error at {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Stored blob exists but is not valid JSON
    #[error("Stored credentials at {path} are unreadable: {source}")]
    Corrupt {
        /// The credentials file
        path: PathBuf,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

    /// Credentials could not be serialized
    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Injected failure (memory store)
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of the pairing credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load stored credentials; `Ok(None)` on first run
    async fn load(&self) -> Result<Option<Credentials>, PersistenceError>;

    /// Replace the stored credentials
    async fn save(&self, credentials: &Credentials) -> Result<(), PersistenceError>;

    /// Forget stored credentials (after revocation)
    async fn clear(&self) -> Result<(), PersistenceError>;
}

/// Default credentials directory (`$XDG_DATA_HOME/submission-relay/auth`)
#[must_use]
pub fn default_credentials_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("submission-relay")
        .join("auth")
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Store credentials under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under [`default_credentials_dir`]
    #[must_use]
    pub fn with_default_dir() -> Self {
        Self::new(default_credentials_dir())
    }

    /// Path of the credentials file
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>, PersistenceError> {
        let path = self.path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(&path, e)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistenceError::Corrupt { path, source })
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::io_error(&self.dir, e))?;

        let json = serde_json::to_vec_pretty(credentials).map_err(PersistenceError::Serialize)?;

        let path = self.path();
        let tmp = self
            .dir
            .join(format!(".{CREDENTIALS_FILE}.{}.tmp", uuid::Uuid::new_v4()));

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let written = async {
            let mut file = options.open(&tmp).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Self::io_error(&path, e));
        }

        tracing::debug!(path = %path.display(), "Credentials saved");
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        let path = self.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Stored credentials removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }
}

/// In-memory store for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<Option<Credentials>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryCredentialStore {
    /// Empty store (first run)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds credentials
    #[must_use]
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Mutex::new(Some(credentials)),
            ..Self::default()
        }
    }

    /// Make every subsequent save fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Current contents
    #[must_use]
    pub fn current(&self) -> Option<Credentials> {
        self.credentials.lock().clone()
    }

    /// Number of successful saves
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>, PersistenceError> {
        Ok(self.credentials.lock().clone())
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), PersistenceError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("saves disabled".into()));
        }
        *self.credentials.lock() = Some(credentials.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        *self.credentials.lock() = None;
        Ok(())
    }
}
