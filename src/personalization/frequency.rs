//! Rolling-window frequency caps and quiet-hour deferral.
//!
//! Hitting a cap is a precondition skip, not an error: it is expected,
//! frequent, and must never surface as a failure or trigger a retry.
//! Quiet hours defer a send to the end of the window; they never drop it.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use tracing::debug;

use crate::errors::Result;
use crate::store::DeliveryRecordStore;
use crate::types::FrequencyPolicy;

/// Read-only gate over the delivery history.
pub struct FrequencyGovernor {
    records: Arc<dyn DeliveryRecordStore>,
}

impl FrequencyGovernor {
    pub fn new(records: Arc<dyn DeliveryRecordStore>) -> Self {
        Self { records }
    }

    /// Whether a send to this recipient is currently blocked by a cap.
    /// Pure read; no side effects.
    pub async fn is_capped(
        &self,
        recipient: &str,
        policy: &FrequencyPolicy,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let day = self
            .records
            .count_for_recipient_since(recipient, now - Duration::hours(24))
            .await?;
        if day >= u64::from(policy.max_per_day) {
            debug!(recipient, count = day, cap = policy.max_per_day, "daily cap reached");
            return Ok(true);
        }

        let week = self
            .records
            .count_for_recipient_since(recipient, now - Duration::days(7))
            .await?;
        if week >= u64::from(policy.max_per_week) {
            debug!(recipient, count = week, cap = policy.max_per_week, "weekly cap reached");
            return Ok(true);
        }

        Ok(false)
    }
}

/// If `now` is inside the policy's quiet window, the instant the window
/// ends (top of the end hour); `None` when sending is allowed now.
pub fn deferral_until(policy: &FrequencyPolicy, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let window = policy.quiet_hours?;
    if !window.contains(now.hour()) {
        return None;
    }
    let end_hour = window.end_hour % 24;
    let date = now.date_naive();
    let today_end =
        Utc.from_utc_datetime(&date.and_hms_opt(end_hour, 0, 0).expect("valid hour"));
    if today_end > now {
        Some(today_end)
    } else {
        Some(today_end + Duration::days(1))
    }
}
