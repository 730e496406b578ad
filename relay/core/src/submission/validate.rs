//! Submission Validator
//!
//! Server-side gate in front of the dispatcher. Every rule is checked
//! independently and all failures are reported together.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{PhotoItem, RawPhoto, RawSubmission, Submission};

/// Accepted MIME types
pub const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png"];

/// Accepted file extensions
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png"];

/// Size and count limits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationLimits {
    /// Largest accepted photo
    pub max_photo_bytes: u64,
    /// Most photos per submission
    pub max_photos: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_photo_bytes: 5 * 1024 * 1024,
            max_photos: 4,
        }
    }
}

/// The input a validation error refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// `firstName`
    FirstName,
    /// `lastName`
    LastName,
    /// `contactNumber`
    ContactNumber,
    /// The photo list as a whole
    Photos,
    /// One photo, by 0-based index
    Photo(usize),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstName => write!(f, "firstName"),
            Self::LastName => write!(f, "lastName"),
            Self::ContactNumber => write!(f, "contactNumber"),
            Self::Photos => write!(f, "photos"),
            Self::Photo(index) => write!(f, "photos[{index}]"),
        }
    }
}

/// One failed rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Offending input
    pub field: Field,
    /// Human-readable reason
    pub message: String,
}

impl FieldError {
    fn new(field: Field, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Non-empty list of failed rules
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{} validation error(s): {}", .0.len(), summarize(.0))]
pub struct ValidationErrors(Vec<FieldError>);

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    /// All failed rules
    #[must_use]
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// Fields that failed, in rule order
    #[must_use]
    pub fn fields(&self) -> Vec<Field> {
        self.0.iter().map(|e| e.field).collect()
    }

    /// Whether `field` failed
    #[must_use]
    pub fn has(&self, field: Field) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// Take the list
    #[must_use]
    pub fn into_vec(self) -> Vec<FieldError> {
        self.0
    }
}

/// Validate a raw submission
///
/// Photo sizes are taken as given; call [`RawSubmission::measure_uploads`]
/// first for file-backed photos. On failure the raw input is dropped here,
/// which releases its temporary uploads.
///
/// # Errors
///
/// Every failed rule, collected.
pub fn validate(
    raw: RawSubmission,
    limits: &ValidationLimits,
) -> Result<Submission, ValidationErrors> {
    check(&raw, limits)?;
    Ok(accept(raw, limits))
}

/// Run every rule without consuming the input
pub(crate) fn check(raw: &RawSubmission, limits: &ValidationLimits) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    let first_name = raw.first_name.trim();
    if first_name.is_empty() {
        errors.push(FieldError::new(Field::FirstName, "First name is required"));
    }

    let last_name = raw.last_name.trim();
    if last_name.is_empty() {
        errors.push(FieldError::new(Field::LastName, "Last name is required"));
    }

    let contact = raw.contact_number.trim();
    if contact.is_empty() {
        errors.push(FieldError::new(
            Field::ContactNumber,
            "Contact number is required",
        ));
    } else if !is_phone_like(contact) {
        errors.push(FieldError::new(
            Field::ContactNumber,
            "Contact number may only contain digits, spaces, and + - ( )",
        ));
    }

    if raw.photos.is_empty() {
        errors.push(FieldError::new(Field::Photos, "At least one photo is required"));
    } else if raw.photos.len() > limits.max_photos {
        errors.push(FieldError::new(
            Field::Photos,
            format!(
                "At most {} photos are allowed, got {}",
                limits.max_photos,
                raw.photos.len()
            ),
        ));
    }

    for (index, photo) in raw.photos.iter().enumerate() {
        check_photo(index, photo, limits, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// Build the immutable record from input that passed [`check`]
pub(crate) fn accept(raw: RawSubmission, limits: &ValidationLimits) -> Submission {
    let max_bytes = limits.max_photo_bytes;
    Submission::new(
        raw.first_name.trim().to_string(),
        raw.last_name.trim().to_string(),
        non_blank(raw.nickname.as_deref()),
        raw.contact_number.trim().to_string(),
        non_blank(raw.details.as_deref()),
        raw.photos
            .into_iter()
            .map(|photo| PhotoItem::from_raw(photo, max_bytes))
            .collect(),
    )
}

fn is_phone_like(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')') || c.is_whitespace())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn check_photo(index: usize, photo: &RawPhoto, limits: &ValidationLimits, errors: &mut Vec<FieldError>) {
    let position = index + 1;

    if photo.size_bytes > limits.max_photo_bytes {
        errors.push(FieldError::new(
            Field::Photo(index),
            format!(
                "Photo {position} is {} bytes; the limit is {} bytes",
                photo.size_bytes, limits.max_photo_bytes
            ),
        ));
    }

    let mime = photo.mime_type.trim().to_ascii_lowercase();
    let extension = Path::new(&photo.original_file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let mime_ok = ALLOWED_MIME_TYPES.contains(&mime.as_str());
    let extension_ok = extension
        .as_deref()
        .is_some_and(|e| ALLOWED_EXTENSIONS.contains(&e));

    if !mime_ok || !extension_ok {
        errors.push(FieldError::new(
            Field::Photo(index),
            format!(
                "Photo {position} ({}) must be a JPEG or PNG image",
                photo.original_file_name
            ),
        ));
    }
}
