//! Two-proportion z-test on variant open rates.
//!
//! The test statistic is
//! `z = |rate_a - rate_b| / sqrt(p(1-p)(1/n_a + 1/n_b))`
//! with `p` the pooled open proportion. z maps onto a discrete confidence
//! score rather than a continuous p-value: callers gate decisions on the
//! familiar 90/95/98/99 ladder.

use crate::types::{Variant, VariantStats};

/// Below this many sends in either variant the test is statistically
/// meaningless and confidence is pinned to zero.
pub const MIN_SENDS_PER_VARIANT: u64 = 30;

/// Outcome of analyzing an experiment's counters.
#[derive(Debug, Clone, Copy)]
pub struct Analysis {
    /// Variant with the higher open rate. Informational until the caller
    /// checks `confidence` against its own threshold.
    pub winner: Variant,
    /// Discrete significance score 0-100
    pub confidence: u8,
    /// Raw z statistic (0 when the sample is too small)
    pub z: f64,
    pub stats_a: VariantStats,
    pub stats_b: VariantStats,
}

/// Map a z statistic to the discrete confidence ladder.
pub fn confidence_from_z(z: f64) -> u8 {
    if z < 1.64 {
        0
    } else if z < 1.96 {
        90
    } else if z < 2.33 {
        95
    } else if z < 2.58 {
        98
    } else {
        99
    }
}

/// Analyze a pair of variant counters.
///
/// Always returns a computed winner/confidence pair; acting on it is the
/// caller's threshold check.
pub fn analyze_stats(stats_a: VariantStats, stats_b: VariantStats) -> Analysis {
    let rate_a = stats_a.open_rate();
    let rate_b = stats_b.open_rate();
    let winner = if rate_b > rate_a { Variant::B } else { Variant::A };

    if stats_a.sent < MIN_SENDS_PER_VARIANT || stats_b.sent < MIN_SENDS_PER_VARIANT {
        return Analysis {
            winner,
            confidence: 0,
            z: 0.0,
            stats_a,
            stats_b,
        };
    }

    let n_a = stats_a.sent as f64;
    let n_b = stats_b.sent as f64;
    let pooled = (stats_a.opens + stats_b.opens) as f64 / (n_a + n_b);
    let se = (pooled * (1.0 - pooled) * (1.0 / n_a + 1.0 / n_b)).sqrt();

    // Identical rates everywhere (all opened or none opened) give se = 0;
    // there is no evidence of a difference.
    let z = if se > 0.0 {
        (rate_a - rate_b).abs() / se
    } else {
        0.0
    };

    Analysis {
        winner,
        confidence: confidence_from_z(z),
        z,
        stats_a,
        stats_b,
    }
}
