#![deny(unreachable_pub)]

//! Email delivery, A/B experimentation and send-time personalization.
//!
//! The engine covers three cooperating concerns:
//! - **Delivery**: transmit one rendered message with capped exponential
//!   backoff and a durable outcome record per logical send.
//! - **Experimentation**: deterministic variant assignment per recipient,
//!   atomic send/open/click counters, and a two-proportion z-test that
//!   gates an auto-stop sweep.
//! - **Personalization & governance**: learned per-recipient send hours,
//!   rolling frequency caps, quiet-hour deferral and cosmetic copy pools.
//!
//! Template rendering, tracking-pixel serving and user management are
//! external collaborators; the engine consumes rendered content and opaque
//! recipient identifiers only.

// Core modules
mod config;
mod delivery;
mod engine;
mod errors;
mod experiment;
mod hash;
mod personalization;
mod provider;

// Seams with swappable implementations
pub mod store;
pub mod types;

// Re-exports
pub use config::{
    AdminDirectory, EngineConfig, ADMIN_EMAILS_ENV, ADMIN_ROLE, API_KEY_ENV, BASE_URL_ENV,
    FROM_ENV,
};
pub use delivery::{backoff_delay, Mailer, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS};
pub use engine::{DispatchOutcome, Engine, Recipient, RenderedEmail, SkipReason};
pub use errors::{Error, ProviderError, Result};
pub use experiment::{
    analyze_stats, confidence_from_z, Analysis, ExperimentCoordinator, ResolvedVariant,
    MIN_SENDS_PER_VARIANT,
};
pub use personalization::{
    deferral_until, personalize_cta, personalize_greeting, personalize_subject,
    FrequencyGovernor, SendTimeOptimizer, DEFAULT_SEND_HOUR,
};
pub use provider::{HttpProvider, MailProvider, OutboundEmail, ProviderReceipt};
