//! Submission data model
//!
//! [`RawSubmission`] is what the intake boundary hands over; [`Submission`]
//! is the validated, immutable record the dispatcher sends.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// Correlation id for one submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub Uuid);

impl SubmissionId {
    /// Generate a new random id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A temporary upload owned by this process
///
/// The pipeline removes the file with [`TempUpload::remove`] once it is done
/// with it. A guard dropped without that (a cancelled caller) removes the
/// file synchronously instead.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    removed: bool,
}

impl TempUpload {
    /// Take ownership of a temporary file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            removed: false,
        }
    }

    /// Location of the file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file on the async runtime
    pub async fn remove(mut self) {
        self.removed = true;
        log_removal(&self.path, tokio::fs::remove_file(&self.path).await);
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if !self.removed {
            log_removal(&self.path, std::fs::remove_file(&self.path));
        }
    }
}

fn log_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => tracing::trace!(path = %path.display(), "Removed temporary upload"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary upload");
        }
    }
}

/// Where a photo's bytes live
#[derive(Debug)]
pub enum PhotoSource {
    /// Temporary file written by the HTTP layer
    File(TempUpload),
    /// Already in memory
    Bytes(Vec<u8>),
}

impl PhotoSource {
    /// Read the photo's bytes, refusing anything larger than `limit`
    ///
    /// A file is never read past `limit + 1` bytes.
    ///
    /// # Errors
    ///
    /// IO errors reading a file-backed photo, or `InvalidData` when the
    /// content is over the limit.
    pub async fn read(&self, limit: u64) -> io::Result<Vec<u8>> {
        let data = match self {
            Self::File(upload) => {
                let file = tokio::fs::File::open(upload.path()).await?;
                let mut data = Vec::new();
                file.take(limit.saturating_add(1))
                    .read_to_end(&mut data)
                    .await?;
                data
            }
            Self::Bytes(bytes) => bytes.clone(),
        };

        if data.len() as u64 > limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("larger than the {limit} byte limit"),
            ));
        }
        Ok(data)
    }

    async fn release(self) {
        if let Self::File(upload) = self {
            upload.remove().await;
        }
    }
}

/// A photo as received, before validation
#[derive(Debug)]
pub struct RawPhoto {
    /// Content
    pub source: PhotoSource,
    /// File name the applicant uploaded
    pub original_file_name: String,
    /// Declared MIME type
    pub mime_type: String,
    /// Size in bytes
    pub size_bytes: u64,
}

impl RawPhoto {
    /// Photo held in memory; size is taken from the data
    pub fn from_bytes(
        original_file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            size_bytes: data.len() as u64,
            source: PhotoSource::Bytes(data),
            original_file_name: original_file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Photo stored in a temporary file this process now owns
    pub fn from_temp_file(
        path: impl Into<PathBuf>,
        original_file_name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            source: PhotoSource::File(TempUpload::new(path)),
            original_file_name: original_file_name.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }

    /// Replace the declared size of a file-backed photo with the file's size
    ///
    /// A file that cannot be inspected keeps its declared size; dispatch
    /// reports it as unreadable later.
    async fn measure(&mut self) {
        let PhotoSource::File(upload) = &self.source else {
            return;
        };
        match tokio::fs::metadata(upload.path()).await {
            Ok(meta) => {
                if meta.len() != self.size_bytes {
                    tracing::debug!(
                        file = %self.original_file_name,
                        declared = self.size_bytes,
                        actual = meta.len(),
                        "Declared photo size differs from upload"
                    );
                }
                self.size_bytes = meta.len();
            }
            Err(e) => {
                tracing::warn!(file = %self.original_file_name, error = %e, "Cannot inspect upload");
            }
        }
    }
}

/// Form fields and photos as received
#[derive(Debug, Default)]
pub struct RawSubmission {
    /// Applicant's first name
    pub first_name: String,
    /// Applicant's last name
    pub last_name: String,
    /// Optional nickname
    pub nickname: Option<String>,
    /// Phone number to reach the applicant
    pub contact_number: String,
    /// Optional free text
    pub details: Option<String>,
    /// Photos in upload order
    pub photos: Vec<RawPhoto>,
}

impl RawSubmission {
    /// Take photo sizes from the uploaded files instead of the declared values
    pub async fn measure_uploads(&mut self) {
        for photo in &mut self.photos {
            photo.measure().await;
        }
    }

    /// Remove the temporary uploads without relaying anything
    pub async fn release_uploads(self) {
        for photo in self.photos {
            photo.source.release().await;
        }
    }
}

/// One validated photo
#[derive(Debug)]
pub struct PhotoItem {
    source: PhotoSource,
    original_file_name: String,
    mime_type: String,
    size_bytes: u64,
    max_bytes: u64,
}

impl PhotoItem {
    pub(crate) fn from_raw(raw: RawPhoto, max_bytes: u64) -> Self {
        Self {
            source: raw.source,
            original_file_name: raw.original_file_name,
            mime_type: raw.mime_type.to_ascii_lowercase(),
            size_bytes: raw.size_bytes,
            max_bytes,
        }
    }

    /// File name the applicant uploaded
    #[must_use]
    pub fn original_file_name(&self) -> &str {
        &self.original_file_name
    }

    /// MIME type (lowercase)
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Load the photo's bytes
    ///
    /// # Errors
    ///
    /// IO errors reading a file-backed photo, or `InvalidData` when the
    /// content has grown past the size limit since validation.
    pub async fn load(&self) -> io::Result<Vec<u8>> {
        self.source.read(self.max_bytes).await
    }
}

/// A validated submission, immutable from here on
#[derive(Debug)]
pub struct Submission {
    id: SubmissionId,
    first_name: String,
    last_name: String,
    nickname: Option<String>,
    contact_number: String,
    details: Option<String>,
    photos: Vec<PhotoItem>,
}

impl Submission {
    pub(crate) fn new(
        first_name: String,
        last_name: String,
        nickname: Option<String>,
        contact_number: String,
        details: Option<String>,
        photos: Vec<PhotoItem>,
    ) -> Self {
        Self {
            id: SubmissionId::new(),
            first_name,
            last_name,
            nickname,
            contact_number,
            details,
            photos,
        }
    }

    /// Correlation id
    #[must_use]
    pub fn id(&self) -> SubmissionId {
        self.id
    }

    /// First name (trimmed)
    #[must_use]
    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    /// Last name (trimmed)
    #[must_use]
    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    /// `First Last`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Nickname, if one was given
    #[must_use]
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    /// Contact number (trimmed)
    #[must_use]
    pub fn contact_number(&self) -> &str {
        &self.contact_number
    }

    /// Additional details, if any were given
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Photos in upload order
    #[must_use]
    pub fn photos(&self) -> &[PhotoItem] {
        &self.photos
    }

    /// Remove the temporary uploads once the submission is finished with
    pub async fn release_uploads(self) {
        for photo in self.photos {
            photo.source.release().await;
        }
    }
}
