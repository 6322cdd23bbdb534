//! A/B experiment definitions and live counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of an experiment.
pub type ExperimentId = u64;

/// Share of traffic routed to variant B when the caller does not specify one.
pub const DEFAULT_TRAFFIC_SPLIT: u8 = 50;

/// The two arms of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque content descriptor for one variant.
///
/// The engine routes these to the external renderer without interpreting
/// them. An empty descriptor is the no-op fallback used when no experiment
/// is active for a category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantContent {
    /// Subject line (or subject template key)
    pub subject_line: String,
    /// Call-to-action text override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cta: Option<String>,
    /// Template content-block keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_blocks: Vec<String>,
}

impl VariantContent {
    pub fn subject(subject_line: impl Into<String>) -> Self {
        Self {
            subject_line: subject_line.into(),
            cta: None,
            content_blocks: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subject_line.is_empty() && self.cta.is_none() && self.content_blocks.is_empty()
    }
}

/// Monotonically non-decreasing counters for one variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStats {
    pub sent: u64,
    pub opens: u64,
    pub clicks: u64,
}

impl VariantStats {
    /// Opens divided by sends, zero when nothing was sent.
    pub fn open_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.opens as f64 / self.sent as f64
        }
    }

    /// Clicks divided by sends, zero when nothing was sent.
    pub fn click_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.clicks as f64 / self.sent as f64
        }
    }
}

/// Definition for creating an experiment.
#[derive(Debug, Clone)]
pub struct NewExperiment {
    pub name: String,
    pub category: String,
    pub variant_a: VariantContent,
    pub variant_b: VariantContent,
    /// Percent of traffic routed to B (0-100)
    pub traffic_split: u8,
}

impl NewExperiment {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        variant_a: VariantContent,
        variant_b: VariantContent,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            variant_a,
            variant_b,
            traffic_split: DEFAULT_TRAFFIC_SPLIT,
        }
    }

    pub fn with_traffic_split(mut self, split: u8) -> Self {
        self.traffic_split = split.min(100);
        self
    }
}

/// Snapshot of an experiment: definition, counters and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub name: String,
    pub category: String,
    pub variant_a: VariantContent,
    pub variant_b: VariantContent,
    /// Percent of traffic routed to B (0-100)
    pub traffic_split: u8,
    pub stats_a: VariantStats,
    pub stats_b: VariantStats,
    pub active: bool,
    /// Winning variant, set when the experiment ends
    pub winner: Option<Variant>,
    /// Significance score 0-100 at end time
    pub confidence: u8,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Experiment {
    /// Counters for the given variant.
    pub fn stats(&self, variant: Variant) -> VariantStats {
        match variant {
            Variant::A => self.stats_a,
            Variant::B => self.stats_b,
        }
    }

    /// Content descriptor for the given variant.
    pub fn content(&self, variant: Variant) -> &VariantContent {
        match variant {
            Variant::A => &self.variant_a,
            Variant::B => &self.variant_b,
        }
    }
}
