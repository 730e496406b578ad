//! Submission Dispatcher
//!
//! Turns a validated submission into one summary text followed by one image
//! message per photo, sent in order under the session's outbound gate.
//!
//! # Message Layout
//!
//! ```text
//! 🌟 *RECRUITMENT APPLICATION* 🌟
//!
//! 👤 *Personal Information*
//! ━━━━━━━━━━━━━━━━━━
//! • *Name:* Ann Lee
//! • *Nickname:* Annie          (only if given)
//! • *Contact:* +1 555-0100
//!
//! 📝 *Additional Details*      (only if given)
//! ━━━━━━━━━━━━━━━━━━
//! ...
//!
//! 📸 *Photos:* 1 attached
//! ━━━━━━━━━━━━━━━━━━
//! ✅ Application received via Submission Relay
//! ```

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::Submission;
use crate::session::SessionHandle;
use crate::transport::{OutboundImage, TransportError};

const RULE: &str = "━━━━━━━━━━━━━━━━━━";

/// Header and footer of the summary message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    /// First line of the summary
    pub header: String,
    /// Last line of the summary
    pub footer: String,
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self {
            header: "🌟 *RECRUITMENT APPLICATION* 🌟".to_string(),
            footer: "✅ Application received via Submission Relay".to_string(),
        }
    }
}

impl MessageTemplate {
    /// Render the summary text for a submission
    #[must_use]
    pub fn render(&self, submission: &Submission) -> String {
        let mut text = String::new();

        // Writing into a String cannot fail
        let _ = write!(text, "{}\n\n", self.header);
        let _ = writeln!(text, "👤 *Personal Information*");
        let _ = writeln!(text, "{RULE}");
        let _ = writeln!(text, "• *Name:* {}", submission.full_name());
        if let Some(nickname) = submission.nickname() {
            let _ = writeln!(text, "• *Nickname:* {nickname}");
        }
        let _ = write!(text, "• *Contact:* {}\n\n", submission.contact_number());

        if let Some(details) = submission.details() {
            let _ = writeln!(text, "📝 *Additional Details*");
            let _ = writeln!(text, "{RULE}");
            let _ = write!(text, "{details}\n\n");
        }

        let _ = writeln!(text, "📸 *Photos:* {} attached", submission.photos().len());
        let _ = writeln!(text, "{RULE}");
        text.push_str(&self.footer);
        text
    }
}

/// Caption for photo `index` (0-based)
#[must_use]
pub fn photo_caption(index: usize, submission: &Submission) -> String {
    format!("📸 Photo {} - {}", index + 1, submission.full_name())
}

/// Why a dispatch stopped
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DispatchFailure {
    /// The session dropped under the sequence
    #[error("session disconnected")]
    Disconnected,

    /// The network refused or failed the send
    #[error("send failed: {0}")]
    SendFailed(String),

    /// No acknowledgement in time
    #[error("send timed out: {0}")]
    Timeout(String),

    /// A photo's bytes could not be read
    #[error("photo {file} unreadable: {reason}")]
    PhotoUnreadable {
        /// Original file name
        file: String,
        /// IO error description
        reason: String,
    },
}

impl From<TransportError> for DispatchFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected | TransportError::ConnectionClosed => Self::Disconnected,
            TransportError::Timeout(msg) => Self::Timeout(msg),
            other => Self::SendFailed(other.to_string()),
        }
    }
}

/// Outcome of one dispatch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchResult {
    /// Every message was accepted
    AllDelivered {
        /// Messages sent (summary plus photos)
        count: usize,
    },
    /// A send failed; later items were not attempted
    Failed {
        /// 0 for the summary, `k` for photo `k` (1-based, as in its caption)
        at_step: usize,
        /// What went wrong
        cause: DispatchFailure,
    },
}

impl DispatchResult {
    /// Whether everything was delivered
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::AllDelivered { .. })
    }
}

/// Sends submissions through a ready session
#[derive(Clone, Debug)]
pub struct Dispatcher {
    template: MessageTemplate,
    send_delay: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(MessageTemplate::default(), Duration::from_millis(500))
    }
}

impl Dispatcher {
    /// Create a dispatcher
    ///
    /// `send_delay` is the pause between consecutive photos.
    #[must_use]
    pub fn new(template: MessageTemplate, send_delay: Duration) -> Self {
        Self {
            template,
            send_delay,
        }
    }

    /// The summary template
    #[must_use]
    pub fn template(&self) -> &MessageTemplate {
        &self.template
    }

    /// Send the summary and then every photo, in order
    ///
    /// Holds the outbound gate for the whole sequence. The first failure ends
    /// the sequence; what was already delivered stays delivered.
    pub async fn dispatch(&self, submission: &Submission, session: &SessionHandle) -> DispatchResult {
        let id = submission.id();
        let summary = self.template.render(submission);

        let sequence = session.begin_sequence().await;
        tracing::debug!(submission = %id, photos = submission.photos().len(), "Dispatch started");

        if let Err(e) = sequence.send_text(&summary).await {
            tracing::warn!(submission = %id, step = 0, error = %e, "Summary send failed");
            return DispatchResult::Failed {
                at_step: 0,
                cause: e.into(),
            };
        }

        for (index, photo) in submission.photos().iter().enumerate() {
            let step = index + 1;
            if index > 0 && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }

            let data = match photo.load().await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(submission = %id, step, error = %e, "Photo unreadable");
                    return DispatchResult::Failed {
                        at_step: step,
                        cause: DispatchFailure::PhotoUnreadable {
                            file: photo.original_file_name().to_string(),
                            reason: e.to_string(),
                        },
                    };
                }
            };

            let image = OutboundImage {
                data,
                mime_type: photo.mime_type().to_string(),
                caption: photo_caption(index, submission),
            };
            if let Err(e) = sequence.send_image(image).await {
                tracing::warn!(submission = %id, step, error = %e, "Photo send failed");
                return DispatchResult::Failed {
                    at_step: step,
                    cause: e.into(),
                };
            }
        }

        let count = 1 + submission.photos().len();
        tracing::info!(submission = %id, count, recipient = %session.recipient(), "Submission delivered");
        DispatchResult::AllDelivered { count }
    }
}
