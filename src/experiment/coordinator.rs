//! Experiment lifecycle coordination.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::hash::percent_bucket;
use crate::store::{CounterField, ExperimentStore};
use crate::types::{
    Experiment, ExperimentId, NewExperiment, Variant, VariantContent,
};

use super::stats::{analyze_stats, Analysis};

/// Sends required in at least one variant before the auto-end sweep will
/// consider an experiment.
const AUTO_END_MIN_SENDS: u64 = 100;

/// Confidence the auto-end sweep requires to stop a test.
const AUTO_END_CONFIDENCE: u8 = 95;

/// Variant resolution for one recipient/category pair.
///
/// When no experiment is active for the category this is the no-op
/// fallback: variant A with empty content, which renderers treat as "use
/// the default template".
#[derive(Debug, Clone)]
pub struct ResolvedVariant {
    pub variant: Variant,
    pub content: VariantContent,
    pub experiment_id: Option<ExperimentId>,
}

impl ResolvedVariant {
    fn fallback() -> Self {
        Self {
            variant: Variant::A,
            content: VariantContent::default(),
            experiment_id: None,
        }
    }
}

/// Deterministic variant assignment.
///
/// A stable hash of the recipient id modulo 100 is compared against the
/// traffic split (percent routed to B). The same recipient always gets the
/// same variant for the same split; no assignment table exists.
pub(crate) fn assign_variant(recipient_id: &str, traffic_split: u8) -> Variant {
    if percent_bucket(recipient_id) < traffic_split.min(100) {
        Variant::B
    } else {
        Variant::A
    }
}

/// Coordinates experiment definitions, counters and the auto-end sweep.
pub struct ExperimentCoordinator {
    store: Arc<dyn ExperimentStore>,
}

impl ExperimentCoordinator {
    pub fn new(store: Arc<dyn ExperimentStore>) -> Self {
        Self { store }
    }

    /// Define a new active experiment.
    pub async fn create_experiment(&self, def: NewExperiment) -> Result<Experiment> {
        let experiment = self.store.create(def, Utc::now()).await?;
        info!(
            experiment_id = experiment.id,
            name = %experiment.name,
            category = %experiment.category,
            traffic_split = experiment.traffic_split,
            "experiment created"
        );
        Ok(experiment)
    }

    /// Most recently created active experiment for a category.
    pub async fn active_for_category(&self, category: &str) -> Result<Option<Experiment>> {
        self.store.active_for_category(category).await
    }

    /// Resolve the variant a recipient should receive for a category.
    pub async fn resolve_variant(
        &self,
        category: &str,
        recipient_id: &str,
    ) -> Result<ResolvedVariant> {
        let Some(experiment) = self.store.active_for_category(category).await? else {
            return Ok(ResolvedVariant::fallback());
        };

        let variant = assign_variant(recipient_id, experiment.traffic_split);
        debug!(
            experiment_id = experiment.id,
            category,
            variant = %variant,
            "variant resolved"
        );
        Ok(ResolvedVariant {
            variant,
            content: experiment.content(variant).clone(),
            experiment_id: Some(experiment.id),
        })
    }

    /// Atomically count one send against a variant.
    pub async fn record_sent(&self, id: ExperimentId, variant: Variant) -> Result<()> {
        self.store.increment(id, variant, CounterField::Sent).await
    }

    /// Atomically count one open against a variant.
    pub async fn record_open(&self, id: ExperimentId, variant: Variant) -> Result<()> {
        self.store.increment(id, variant, CounterField::Opens).await
    }

    /// Atomically count one click against a variant.
    pub async fn record_click(&self, id: ExperimentId, variant: Variant) -> Result<()> {
        self.store
            .increment(id, variant, CounterField::Clicks)
            .await
    }

    /// Compute winner and confidence from the current counters.
    pub async fn analyze(&self, id: ExperimentId) -> Result<Analysis> {
        let experiment = self
            .store
            .get(id)
            .await?
            .ok_or(Error::ExperimentNotFound(id))?;
        Ok(analyze_stats(experiment.stats_a, experiment.stats_b))
    }

    /// Freeze an experiment with its current winner and confidence.
    /// Idempotent: returns `false` if it was already ended.
    pub async fn end_experiment(&self, id: ExperimentId) -> Result<bool> {
        let analysis = self.analyze(id).await?;
        let ended = self
            .store
            .end_if_active(id, Some(analysis.winner), analysis.confidence, Utc::now())
            .await?;
        if ended {
            info!(
                experiment_id = id,
                winner = %analysis.winner,
                confidence = analysis.confidence,
                "experiment ended"
            );
        }
        Ok(ended)
    }

    /// Batch sweep over active experiments, ending those with a sufficient
    /// sample (>= 100 sends in at least one variant) and confidence >= 95.
    ///
    /// Safe to run concurrently with sends and with other sweeps: it only
    /// reads counters, and ending is a conditional flip of the active flag.
    /// Returns the number of experiments this sweep ended.
    pub async fn auto_end_eligible(&self) -> Result<usize> {
        let mut ended = 0;
        for experiment in self.store.list_active().await? {
            if experiment.stats_a.sent.max(experiment.stats_b.sent) < AUTO_END_MIN_SENDS {
                continue;
            }
            let analysis = analyze_stats(experiment.stats_a, experiment.stats_b);
            if analysis.confidence < AUTO_END_CONFIDENCE {
                continue;
            }
            let won = self
                .store
                .end_if_active(
                    experiment.id,
                    Some(analysis.winner),
                    analysis.confidence,
                    Utc::now(),
                )
                .await?;
            if won {
                info!(
                    experiment_id = experiment.id,
                    name = %experiment.name,
                    winner = %analysis.winner,
                    confidence = analysis.confidence,
                    z = analysis.z,
                    "experiment auto-ended"
                );
                ended += 1;
            } else {
                debug!(
                    experiment_id = experiment.id,
                    "experiment already ended by a concurrent sweep"
                );
            }
        }
        Ok(ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryExperimentStore;
    use crate::types::NewExperiment;

    fn coordinator() -> ExperimentCoordinator {
        ExperimentCoordinator::new(Arc::new(MemoryExperimentStore::new()))
    }

    fn def(category: &str) -> NewExperiment {
        NewExperiment::new(
            "subject test",
            category,
            VariantContent::subject("Your match is waiting"),
            VariantContent::subject("Someone liked your profile"),
        )
    }

    #[test]
    fn test_assignment_deterministic() {
        for i in 0..200 {
            let id = format!("user-{i}");
            let first = assign_variant(&id, 50);
            for _ in 0..10 {
                assert_eq!(assign_variant(&id, 50), first);
            }
        }
    }

    #[test]
    fn test_assignment_extremes() {
        for i in 0..100 {
            let id = format!("user-{i}");
            assert_eq!(assign_variant(&id, 0), Variant::A);
            assert_eq!(assign_variant(&id, 100), Variant::B);
        }
    }

    #[test]
    fn test_assignment_split_roughly_honored() {
        let mut b_count = 0;
        for i in 0..10_000 {
            if assign_variant(&format!("user-{i}"), 30) == Variant::B {
                b_count += 1;
            }
        }
        // 30% +- 5pp over 10k recipients.
        assert!(
            (2500..3500).contains(&b_count),
            "B share {b_count} out of range"
        );
    }

    #[tokio::test]
    async fn test_resolve_without_experiment_falls_back() {
        let coordinator = coordinator();

        let resolved = coordinator.resolve_variant("MATCH", "user-1").await.unwrap();

        assert_eq!(resolved.variant, Variant::A);
        assert!(resolved.content.is_empty());
        assert!(resolved.experiment_id.is_none());
    }

    #[tokio::test]
    async fn test_resolve_returns_variant_content() {
        let coordinator = coordinator();
        let experiment = coordinator.create_experiment(def("MATCH")).await.unwrap();

        let resolved = coordinator.resolve_variant("MATCH", "user-7").await.unwrap();

        assert_eq!(resolved.experiment_id, Some(experiment.id));
        assert_eq!(resolved.content, *experiment.content(resolved.variant));
        assert!(!resolved.content.is_empty());
    }

    #[tokio::test]
    async fn test_counters_accumulate() {
        let coordinator = coordinator();
        let experiment = coordinator.create_experiment(def("MATCH")).await.unwrap();

        for _ in 0..3 {
            coordinator
                .record_sent(experiment.id, Variant::A)
                .await
                .unwrap();
        }
        coordinator
            .record_open(experiment.id, Variant::A)
            .await
            .unwrap();
        coordinator
            .record_click(experiment.id, Variant::A)
            .await
            .unwrap();

        let analysis = coordinator.analyze(experiment.id).await.unwrap();
        assert_eq!(analysis.stats_a.sent, 3);
        assert_eq!(analysis.stats_a.opens, 1);
        assert_eq!(analysis.stats_a.clicks, 1);
    }

    #[tokio::test]
    async fn test_auto_end_sweep() {
        let coordinator = coordinator();
        let experiment = coordinator.create_experiment(def("MATCH")).await.unwrap();

        // 40% vs 52% open rate at n=500: z ~= 3.8, confidence 99.
        for _ in 0..500 {
            coordinator
                .record_sent(experiment.id, Variant::A)
                .await
                .unwrap();
            coordinator
                .record_sent(experiment.id, Variant::B)
                .await
                .unwrap();
        }
        for _ in 0..200 {
            coordinator
                .record_open(experiment.id, Variant::A)
                .await
                .unwrap();
        }
        for _ in 0..260 {
            coordinator
                .record_open(experiment.id, Variant::B)
                .await
                .unwrap();
        }

        let ended = coordinator.auto_end_eligible().await.unwrap();
        assert_eq!(ended, 1);

        let stored = coordinator
            .active_for_category("MATCH")
            .await
            .unwrap();
        assert!(stored.is_none(), "ended experiment must not be active");

        let analysis = coordinator.analyze(experiment.id).await.unwrap();
        assert_eq!(analysis.winner, Variant::B);
        assert!(analysis.confidence >= 95);

        // A second sweep finds nothing to end.
        assert_eq!(coordinator.auto_end_eligible().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_auto_end_skips_small_or_inconclusive() {
        let coordinator = coordinator();
        let small = coordinator.create_experiment(def("MATCH")).await.unwrap();
        let flat = coordinator.create_experiment(def("DIGEST")).await.unwrap();

        // Small: conclusive rates but under the 100-send floor.
        for _ in 0..50 {
            coordinator.record_sent(small.id, Variant::A).await.unwrap();
            coordinator.record_sent(small.id, Variant::B).await.unwrap();
        }
        for _ in 0..40 {
            coordinator.record_open(small.id, Variant::B).await.unwrap();
        }

        // Flat: big sample, no difference.
        for _ in 0..500 {
            coordinator.record_sent(flat.id, Variant::A).await.unwrap();
            coordinator.record_sent(flat.id, Variant::B).await.unwrap();
        }
        for _ in 0..100 {
            coordinator.record_open(flat.id, Variant::A).await.unwrap();
            coordinator.record_open(flat.id, Variant::B).await.unwrap();
        }

        assert_eq!(coordinator.auto_end_eligible().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_end_experiment_idempotent() {
        let coordinator = coordinator();
        let experiment = coordinator.create_experiment(def("MATCH")).await.unwrap();

        assert!(coordinator.end_experiment(experiment.id).await.unwrap());
        assert!(!coordinator.end_experiment(experiment.id).await.unwrap());
    }
}
