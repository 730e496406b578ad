//! Submission Pipeline
//!
//! ```text
//! RawSubmission ──► validate ──► Submission ──► Dispatcher ──► SessionHandle
//!                      │                            │
//!                      ▼                            ▼
//!               ValidationErrors             DispatchResult
//! ```
//!
//! [`SubmissionService`] ties the steps together for the intake boundary.

pub mod dispatch;
pub mod model;
pub mod service;
pub mod validate;

pub use dispatch::{photo_caption, DispatchFailure, DispatchResult, Dispatcher, MessageTemplate};
pub use model::{
    PhotoItem, PhotoSource, RawPhoto, RawSubmission, Submission, SubmissionId, TempUpload,
};
pub use service::{DispatchReceipt, SubmissionError, SubmissionService};
pub use validate::{
    validate, Field, FieldError, ValidationErrors, ValidationLimits, ALLOWED_EXTENSIONS,
    ALLOWED_MIME_TYPES,
};
