//! Per-recipient personalization and send governance.
//!
//! Three independent concerns:
//! - `send_time` - learned optimal send hour per recipient
//! - `frequency` - rolling-window frequency caps and quiet-hour deferral
//! - `copy` - cosmetic subject/greeting/CTA selection from fixed pools
//!
//! The copy pools are deliberately not experiment variants: they are
//! pre-written flourishes, not statistically driven content.

mod copy;
mod frequency;
mod send_time;

pub use copy::{personalize_cta, personalize_greeting, personalize_subject};
pub use frequency::{deferral_until, FrequencyGovernor};
pub use send_time::{SendTimeOptimizer, DEFAULT_SEND_HOUR};
