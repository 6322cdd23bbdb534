//! Per-recipient send-hour learning.
//!
//! Every confirmed open feeds a weighted-average open-rate update for the
//! hour the message was *sent* (not the hour it was opened): the model
//! learns which send hours succeed at being opened. The optimal hour is
//! always the argmax of the learned map and falls back to a default evening
//! hour until data exists.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::store::SendTimeProfileStore;
use crate::types::SendTimeProfile;

/// Fallback send hour for recipients with no learned profile (19:00).
pub const DEFAULT_SEND_HOUR: u32 = 19;

/// Chooses per-recipient send times and ingests open observations.
pub struct SendTimeOptimizer {
    profiles: Arc<dyn SendTimeProfileStore>,
    default_hour: u32,
}

impl SendTimeOptimizer {
    pub fn new(profiles: Arc<dyn SendTimeProfileStore>, default_hour: u32) -> Self {
        Self {
            profiles,
            default_hour: default_hour % 24,
        }
    }

    /// Next occurrence of the recipient's optimal hour.
    ///
    /// Returns today's occurrence of the learned hour, rolled to tomorrow
    /// if that hour has already passed. Recipients without a profile get
    /// the default hour.
    pub async fn optimal_send_time(
        &self,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let hour = match self.profiles.get(recipient_id).await? {
            Some(profile) => profile.optimal_hour,
            None => self.default_hour,
        };
        Ok(next_occurrence(now, hour))
    }

    /// Fold one open observation into the recipient's profile.
    pub async fn record_open(
        &self,
        recipient_id: &str,
        sent_at: DateTime<Utc>,
        opened_at: DateTime<Utc>,
    ) -> Result<()> {
        if opened_at < sent_at {
            warn!(
                recipient_id,
                "open event predates send time, ignoring observation"
            );
            return Ok(());
        }

        let mut profile = match self.profiles.get(recipient_id).await? {
            Some(profile) => profile,
            None => SendTimeProfile::new(recipient_id, self.default_hour, opened_at),
        };
        profile.observe_open(sent_at.hour(), opened_at);
        debug!(
            recipient_id,
            sent_hour = sent_at.hour(),
            optimal_hour = profile.optimal_hour,
            data_points = profile.data_points,
            confidence = profile.confidence(),
            "send-time profile updated"
        );
        self.profiles.upsert(profile).await
    }

    /// Learned confidence for a recipient, zero without a profile.
    pub async fn confidence(&self, recipient_id: &str) -> Result<f64> {
        Ok(self
            .profiles
            .get(recipient_id)
            .await?
            .map_or(0.0, |p| p.confidence()))
    }
}

/// Today's occurrence of `hour`, or tomorrow's if it already passed.
fn next_occurrence(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let date = now.date_naive();
    let today = Utc
        .from_utc_datetime(&date.and_hms_opt(hour % 24, 0, 0).expect("valid hour"));
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
