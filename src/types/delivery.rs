//! Send requests, send results and the durable delivery record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::experiment::{ExperimentId, Variant};

/// Store-assigned identifier of one logical send.
pub type DeliveryId = u64;

/// Category applied when the caller does not tag the send.
pub const DEFAULT_CATEGORY: &str = "GENERAL";

/// Maximum transmission attempts per logical send unless overridden.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle of a delivery record.
///
/// A record is created `Pending` before the first transmission attempt and
/// transitions to exactly one terminal state. Retries within the same
/// logical send never create additional records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    /// Whether the record has reached its terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

/// Link from a delivery to the experiment variant it carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRef {
    pub id: ExperimentId,
    pub variant: Variant,
}

/// One rendered message handed to the delivery service.
///
/// Subject and bodies arrive fully rendered; the engine never interprets
/// their content.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Recipient email address
    pub to: String,
    /// Fully rendered subject line
    pub subject: String,
    /// Fully rendered HTML body
    pub html: String,
    /// Fully rendered plain-text body
    pub text: String,
    /// Category tag used for frequency accounting and experiment lookup
    pub category: String,
    /// Owning user reference, when the recipient is a known user
    pub owner_user_id: Option<String>,
    /// Maximum transmission attempts for this message
    pub max_retries: u32,
    /// Experiment variant this message carries, if any
    pub experiment: Option<ExperimentRef>,
}

impl SendRequest {
    /// Build a request with default category and retry budget.
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html: html.into(),
            text: text.into(),
            category: DEFAULT_CATEGORY.to_string(),
            owner_user_id: None,
            max_retries: DEFAULT_MAX_RETRIES,
            experiment: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_owner(mut self, user_id: impl Into<String>) -> Self {
        self.owner_user_id = Some(user_id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_experiment(mut self, reference: ExperimentRef) -> Self {
        self.experiment = Some(reference);
        self
    }
}

/// Outcome of one logical send, as seen by the caller.
///
/// The delivery service never returns an `Err`; callers must check
/// `success`.
#[derive(Debug, Clone)]
pub struct SendResult {
    /// Whether the message reached the provider (or dry-run) successfully
    pub success: bool,
    /// Record created for this send (absent only if record creation failed)
    pub delivery_id: Option<DeliveryId>,
    /// Provider message id on live success
    pub provider_message_id: Option<String>,
    /// Error detail on failure
    pub error: Option<String>,
}

impl SendResult {
    /// Successful delivery (live or dry-run).
    pub fn delivered(delivery_id: DeliveryId, provider_message_id: Option<String>) -> Self {
        Self {
            success: true,
            delivery_id: Some(delivery_id),
            provider_message_id,
            error: None,
        }
    }

    /// Terminal transmission failure.
    pub fn failed(delivery_id: DeliveryId, error: String) -> Self {
        Self {
            success: false,
            delivery_id: Some(delivery_id),
            provider_message_id: None,
            error: Some(error),
        }
    }

    /// Send rejected before a record could be created.
    pub fn rejected(error: String) -> Self {
        Self {
            success: false,
            delivery_id: None,
            provider_message_id: None,
            error: Some(error),
        }
    }
}

/// Fields needed to create a `Pending` record.
#[derive(Debug, Clone)]
pub struct DeliveryDraft {
    pub recipient: String,
    pub owner_user_id: Option<String>,
    pub category: String,
    pub experiment: Option<ExperimentRef>,
    pub created_at: DateTime<Utc>,
}

/// Durable record of one logical send attempt and its terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: DeliveryId,
    pub recipient: String,
    pub owner_user_id: Option<String>,
    pub category: String,
    pub status: DeliveryStatus,
    pub experiment: Option<ExperimentRef>,
    /// Creation time, which is also the send time for this record
    pub created_at: DateTime<Utc>,
    /// When the record reached Delivered or Failed
    pub completed_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    /// Present only when status is Failed
    pub error: Option<String>,
}

impl DeliveryRecord {
    /// Create a fresh pending record from a draft.
    pub fn pending(id: DeliveryId, draft: DeliveryDraft) -> Self {
        Self {
            id,
            recipient: draft.recipient,
            owner_user_id: draft.owner_user_id,
            category: draft.category,
            status: DeliveryStatus::Pending,
            experiment: draft.experiment,
            created_at: draft.created_at,
            completed_at: None,
            opened_at: None,
            clicked_at: None,
            provider_message_id: None,
            error: None,
        }
    }
}

/// Result of stamping an open/click event onto a record.
#[derive(Debug, Clone)]
pub struct EventMark {
    /// Record after the stamp
    pub record: DeliveryRecord,
    /// Whether this was the first such event for the record.
    /// Duplicate tracking callbacks must not double-count.
    pub first: bool,
}
