//! A/B experimentation over email content variants.
//!
//! Assignment is a stable hash of the recipient id, so the same recipient
//! always lands in the same variant for a given traffic split without a
//! persisted assignment table. Significance uses a two-proportion z-test
//! on open rates, and the auto-end sweep stops tests once they are both
//! large enough and conclusive.

mod coordinator;
mod stats;

pub use coordinator::{ExperimentCoordinator, ResolvedVariant};
pub use stats::{analyze_stats, confidence_from_z, Analysis, MIN_SENDS_PER_VARIANT};
