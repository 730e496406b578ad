//! Intake Messages
//!
//! Frames exchanged on the daemon's intake socket. The HTTP layer parses the
//! multipart form, writes each photo to a temporary file, and sends one
//! [`IntakeRequest::Submit`]. From then on the relay owns those files and
//! removes them whatever the outcome.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::session::{HealthSnapshot, SessionState};
use crate::submission::{
    DispatchReceipt, FieldError, RawPhoto, RawSubmission, SubmissionError, SubmissionId,
};

/// Requests from the HTTP layer
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntakeRequest {
    /// Relay an application
    Submit(SubmissionForm),
    /// Report session readiness
    Health,
}

/// Form fields plus references to uploaded photos
///
/// Not `Clone`: converting a form hands its temp files to removal guards, so
/// only one value may ever refer to them.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionForm {
    /// Applicant's first name
    pub first_name: String,
    /// Applicant's last name
    pub last_name: String,
    /// Optional nickname
    #[serde(default)]
    pub nickname: Option<String>,
    /// Phone number to reach the applicant
    pub contact_number: String,
    /// Optional free text
    #[serde(default)]
    pub details: Option<String>,
    /// Uploaded photos in order
    #[serde(default)]
    pub photos: Vec<UploadedPhoto>,
}

/// A photo the HTTP layer stored in a temporary file
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPhoto {
    /// Temporary file path
    pub path: PathBuf,
    /// File name the applicant uploaded
    pub original_file_name: String,
    /// Declared MIME type
    pub mime_type: String,
    /// Size in bytes as declared by the HTTP layer; the file is measured again
    pub size_bytes: u64,
}

impl SubmissionForm {
    /// Convert to the pipeline's input, taking ownership of the temp files
    #[must_use]
    pub fn into_raw(self) -> RawSubmission {
        RawSubmission {
            first_name: self.first_name,
            last_name: self.last_name,
            nickname: self.nickname,
            contact_number: self.contact_number,
            details: self.details,
            photos: self
                .photos
                .into_iter()
                .map(|p| {
                    RawPhoto::from_temp_file(p.path, p.original_file_name, p.mime_type, p.size_bytes)
                })
                .collect(),
        }
    }

    /// Take ownership of the temp files without relaying anything
    ///
    /// Used when a request cannot be processed at all.
    pub async fn discard(self) {
        self.into_raw().release_uploads().await;
    }
}

/// Replies to the HTTP layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntakeResponse {
    /// Everything was delivered
    Accepted {
        /// Correlation id
        submission_id: SubmissionId,
        /// Messages sent
        delivered: usize,
    },

    /// Not delivered
    Rejected {
        /// HTTP status to answer with
        status: u16,
        /// Machine-readable reason
        reason: String,
        /// Human-readable message
        message: String,
        /// Per-field problems (validation only)
        #[serde(default)]
        field_errors: Vec<FieldError>,
    },

    /// Session readiness
    Health {
        /// Current state
        state: SessionState,
        /// Whether submissions would be accepted
        ready: bool,
    },
}

impl IntakeResponse {
    /// Reply for a request that could not be decoded
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Rejected {
            status: 400,
            reason: "bad_request".to_string(),
            message: message.into(),
            field_errors: Vec::new(),
        }
    }

    /// HTTP status this reply maps to
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Accepted { .. } | Self::Health { .. } => 200,
            Self::Rejected { status, .. } => *status,
        }
    }
}

impl From<Result<DispatchReceipt, SubmissionError>> for IntakeResponse {
    fn from(result: Result<DispatchReceipt, SubmissionError>) -> Self {
        match result {
            Ok(receipt) => Self::Accepted {
                submission_id: receipt.submission_id,
                delivered: receipt.delivered,
            },
            Err(e) => Self::Rejected {
                status: e.status_code(),
                reason: e.reason().to_string(),
                message: e.to_string(),
                field_errors: e.field_errors().to_vec(),
            },
        }
    }
}

impl From<HealthSnapshot> for IntakeResponse {
    fn from(health: HealthSnapshot) -> Self {
        Self::Health {
            state: health.state,
            ready: health.ready,
        }
    }
}
