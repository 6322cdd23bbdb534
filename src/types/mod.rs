//! Domain types shared across the engine.
//!
//! Split by concern:
//! - `delivery` - send requests/results and the durable `DeliveryRecord`
//! - `experiment` - A/B test definitions, variants and live counters
//! - `profile` - per-recipient send-time learning and frequency policy

mod delivery;
mod experiment;
mod profile;

pub use delivery::{
    DeliveryDraft, DeliveryId, DeliveryRecord, DeliveryStatus, EventMark, ExperimentRef,
    SendRequest, SendResult, DEFAULT_CATEGORY, DEFAULT_MAX_RETRIES,
};
pub use experiment::{
    Experiment, ExperimentId, NewExperiment, Variant, VariantContent, VariantStats,
    DEFAULT_TRAFFIC_SPLIT,
};
pub use profile::{FrequencyPolicy, QuietWindow, SendTimeProfile, HOURS_PER_DAY};
