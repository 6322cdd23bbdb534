//! Repository seams for the engine's durable state.
//!
//! All shared-resource coordination happens through these interfaces, not
//! in-process locks held by callers: experiment counters mutate only via
//! `increment`, and ending an experiment is a conditional update on the
//! active flag so two concurrent auto-end sweeps cannot both end the same
//! test. A SQL-backed implementation would map `increment` to
//! `UPDATE ... SET c = c + 1` and `end_if_active` to
//! `UPDATE ... SET active = false WHERE id = ? AND active = true`.

mod memory;

pub use memory::{MemoryDeliveryStore, MemoryExperimentStore, MemoryProfileStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::types::{
    DeliveryDraft, DeliveryId, DeliveryRecord, EventMark, Experiment, ExperimentId, NewExperiment,
    SendTimeProfile, Variant,
};

/// Counter selected by an increment operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    Sent,
    Opens,
    Clicks,
}

/// Durable store of delivery records.
#[async_trait]
pub trait DeliveryRecordStore: Send + Sync {
    /// Create a `Pending` record. Called exactly once per logical send,
    /// before the first transmission attempt.
    async fn create(&self, draft: DeliveryDraft) -> Result<DeliveryRecord>;

    /// Transition Pending -> Delivered. No-op if already terminal.
    async fn mark_delivered(
        &self,
        id: DeliveryId,
        provider_message_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Transition Pending -> Failed with error detail. No-op if already
    /// terminal.
    async fn mark_failed(&self, id: DeliveryId, error: String, at: DateTime<Utc>) -> Result<()>;

    /// Stamp an open event. Returns `None` for an unknown record.
    async fn mark_opened(&self, id: DeliveryId, at: DateTime<Utc>) -> Result<Option<EventMark>>;

    /// Stamp a click event. Returns `None` for an unknown record.
    async fn mark_clicked(&self, id: DeliveryId, at: DateTime<Utc>) -> Result<Option<EventMark>>;

    /// Fetch one record.
    async fn get(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>>;

    /// Number of records created for a recipient since the given instant.
    /// Feeds the rolling-window frequency gate.
    async fn count_for_recipient_since(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> Result<u64>;
}

/// Durable store of experiments and their live counters.
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    /// Create an active experiment and return its snapshot.
    async fn create(&self, def: NewExperiment, now: DateTime<Utc>) -> Result<Experiment>;

    /// Fetch one experiment snapshot.
    async fn get(&self, id: ExperimentId) -> Result<Option<Experiment>>;

    /// Most recently created active experiment for a category, if any.
    async fn active_for_category(&self, category: &str) -> Result<Option<Experiment>>;

    /// Snapshots of all active experiments.
    async fn list_active(&self) -> Result<Vec<Experiment>>;

    /// Atomically add one to a per-variant counter. Never read-modify-write:
    /// many concurrent senders target the same experiment.
    async fn increment(
        &self,
        id: ExperimentId,
        variant: Variant,
        field: CounterField,
    ) -> Result<()>;

    /// Conditionally end an experiment: flips active true -> false exactly
    /// once and stores the outcome. Returns `false` when another caller
    /// already ended it (or it never existed as active).
    async fn end_if_active(
        &self,
        id: ExperimentId,
        winner: Option<Variant>,
        confidence: u8,
        at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Store of per-recipient send-time profiles.
///
/// Profiles are exclusively owned by the personalization engine, so a plain
/// get/upsert surface is sufficient here.
#[async_trait]
pub trait SendTimeProfileStore: Send + Sync {
    async fn get(&self, recipient_id: &str) -> Result<Option<SendTimeProfile>>;

    async fn upsert(&self, profile: SendTimeProfile) -> Result<()>;
}
