//! Per-recipient send-time learning state and frequency policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hours in the per-recipient open-rate map.
pub const HOURS_PER_DAY: usize = 24;

/// Sample count at which send-time confidence saturates at 1.0.
const CONFIDENCE_SATURATION: u32 = 20;

/// Learned open-rate-by-hour model for one recipient.
///
/// The optimal hour is always the argmax of the current per-hour map; it is
/// recomputed on every observation and never set independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendTimeProfile {
    pub recipient_id: String,
    /// Running weighted-average open rate per hour-of-day the message was sent
    pub hourly_open_rate: [f64; HOURS_PER_DAY],
    /// Observations folded into each hour's average
    pub hourly_samples: [u32; HOURS_PER_DAY],
    /// Argmax of `hourly_open_rate`
    pub optimal_hour: u32,
    /// Total observations across all hours
    pub data_points: u32,
    pub updated_at: DateTime<Utc>,
}

impl SendTimeProfile {
    /// Fresh profile with no observations, anchored at the default hour.
    pub fn new(recipient_id: impl Into<String>, default_hour: u32, now: DateTime<Utc>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            hourly_open_rate: [0.0; HOURS_PER_DAY],
            hourly_samples: [0; HOURS_PER_DAY],
            optimal_hour: default_hour % 24,
            data_points: 0,
            updated_at: now,
        }
    }

    /// Fold one observed open into the hour the message was sent.
    ///
    /// Weighted-average update: `rate' = (rate * n + 1) / (n + 1)` where n
    /// is the number of observations already folded into that hour.
    pub fn observe_open(&mut self, sent_hour: u32, now: DateTime<Utc>) {
        let hour = (sent_hour % 24) as usize;
        let n = f64::from(self.hourly_samples[hour]);
        self.hourly_open_rate[hour] = (self.hourly_open_rate[hour] * n + 1.0) / (n + 1.0);
        self.hourly_samples[hour] += 1;
        self.data_points += 1;
        self.optimal_hour = self.argmax_hour();
        self.updated_at = now;
    }

    /// Confidence in the learned hour, saturating at 1.0 after enough data.
    pub fn confidence(&self) -> f64 {
        (f64::from(self.data_points) / f64::from(CONFIDENCE_SATURATION)).min(1.0)
    }

    fn argmax_hour(&self) -> u32 {
        let mut best = 0usize;
        for hour in 1..HOURS_PER_DAY {
            if self.hourly_open_rate[hour] > self.hourly_open_rate[best] {
                best = hour;
            }
        }
        best as u32
    }
}

/// Quiet-hour window `[start, end)` in hours-of-day during which sends are
/// deferred, not dropped. May wrap midnight (e.g. 22 -> 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietWindow {
    /// Whether the given hour-of-day falls inside the window.
    pub fn contains(&self, hour: u32) -> bool {
        let (hour, start, end) = (hour % 24, self.start_hour % 24, self.end_hour % 24);
        if start == end {
            return false;
        }
        if start < end {
            (start..end).contains(&hour)
        } else {
            hour >= start || hour < end
        }
    }
}

/// Frequency caps for one recipient. Read-only configuration owned by an
/// external preference-management collaborator; consulted before every send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyPolicy {
    /// Maximum sends in any rolling 24h window
    pub max_per_day: u32,
    /// Maximum sends in any rolling 7d window
    pub max_per_week: u32,
    /// Optional deferral window
    pub quiet_hours: Option<QuietWindow>,
}

impl Default for FrequencyPolicy {
    fn default() -> Self {
        Self {
            max_per_day: 2,
            max_per_week: 7,
            quiet_hours: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> SendTimeProfile {
        SendTimeProfile::new("user-1", 19, Utc::now())
    }

    #[test]
    fn test_new_profile_uses_default_hour() {
        assert_eq!(profile().optimal_hour, 19);
        assert_eq!(profile().data_points, 0);
    }

    #[test]
    fn test_weighted_average_update() {
        let mut p = profile();
        let now = Utc::now();

        p.observe_open(9, now);
        assert!((p.hourly_open_rate[9] - 1.0).abs() < 1e-12);

        p.observe_open(9, now);
        // (1.0 * 1 + 1) / 2 = 1.0 still
        assert!((p.hourly_open_rate[9] - 1.0).abs() < 1e-12);
        assert_eq!(p.hourly_samples[9], 2);
        assert_eq!(p.data_points, 2);
    }

    #[test]
    fn test_optimal_hour_follows_argmax() {
        let mut p = profile();
        let now = Utc::now();

        p.observe_open(9, now);
        assert_eq!(p.optimal_hour, 9);

        // More signal at hour 20 cannot beat hour 9's perfect rate, but an
        // equal rate keeps the earlier hour (strictly-greater argmax).
        p.observe_open(20, now);
        assert_eq!(p.optimal_hour, 9);
    }

    #[test]
    fn test_confidence_saturates() {
        let mut p = profile();
        let now = Utc::now();

        assert_eq!(p.confidence(), 0.0);
        for _ in 0..10 {
            p.observe_open(9, now);
        }
        assert!((p.confidence() - 0.5).abs() < 1e-12);
        for _ in 0..30 {
            p.observe_open(9, now);
        }
        assert_eq!(p.confidence(), 1.0);
    }

    #[test]
    fn test_quiet_window_simple() {
        let window = QuietWindow {
            start_hour: 22,
            end_hour: 7,
        };
        assert!(window.contains(23));
        assert!(window.contains(2));
        assert!(!window.contains(7));
        assert!(!window.contains(12));

        let day = QuietWindow {
            start_hour: 9,
            end_hour: 17,
        };
        assert!(day.contains(9));
        assert!(day.contains(16));
        assert!(!day.contains(17));
        assert!(!day.contains(3));
    }

    #[test]
    fn test_degenerate_quiet_window_is_empty() {
        let window = QuietWindow {
            start_hour: 5,
            end_hour: 5,
        };
        for hour in 0..24 {
            assert!(!window.contains(hour));
        }
    }

    #[test]
    fn test_policy_defaults() {
        let policy = FrequencyPolicy::default();
        assert_eq!(policy.max_per_day, 2);
        assert_eq!(policy.max_per_week, 7);
        assert!(policy.quiet_hours.is_none());
    }
}
