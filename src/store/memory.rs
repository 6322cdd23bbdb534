//! In-memory store implementations.
//!
//! Used for tests, dry-run tooling and single-process deployments. The
//! atomicity contracts match what a SQL backend would provide: counter
//! increments are `fetch_add` on shared atomics and experiment ending is a
//! compare-and-swap on the active flag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};
use crate::types::{
    DeliveryDraft, DeliveryId, DeliveryRecord, DeliveryStatus, EventMark, Experiment, ExperimentId,
    NewExperiment, SendTimeProfile, Variant, VariantContent, VariantStats,
};

use super::{CounterField, DeliveryRecordStore, ExperimentStore, SendTimeProfileStore};

fn poisoned<T>(_: T) -> Error {
    Error::Store("store lock poisoned".to_string())
}

// ---------------------------------------------------------------------------
// Delivery records
// ---------------------------------------------------------------------------

/// In-memory delivery record store.
#[derive(Default)]
pub struct MemoryDeliveryStore {
    records: RwLock<HashMap<DeliveryId, DeliveryRecord>>,
    next_id: AtomicU64,
}

impl MemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryRecordStore for MemoryDeliveryStore {
    async fn create(&self, draft: DeliveryDraft) -> Result<DeliveryRecord> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let record = DeliveryRecord::pending(id, draft);
        self.records
            .write()
            .map_err(poisoned)?
            .insert(id, record.clone());
        Ok(record)
    }

    async fn mark_delivered(
        &self,
        id: DeliveryId,
        provider_message_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        if let Some(record) = records.get_mut(&id) {
            if !record.status.is_terminal() {
                record.status = DeliveryStatus::Delivered;
                record.provider_message_id = provider_message_id;
                record.completed_at = Some(at);
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, id: DeliveryId, error: String, at: DateTime<Utc>) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        if let Some(record) = records.get_mut(&id) {
            if !record.status.is_terminal() {
                record.status = DeliveryStatus::Failed;
                record.error = Some(error);
                record.completed_at = Some(at);
            }
        }
        Ok(())
    }

    async fn mark_opened(&self, id: DeliveryId, at: DateTime<Utc>) -> Result<Option<EventMark>> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records.get_mut(&id).map(|record| {
            let first = record.opened_at.is_none();
            if first {
                record.opened_at = Some(at);
            }
            EventMark {
                record: record.clone(),
                first,
            }
        }))
    }

    async fn mark_clicked(&self, id: DeliveryId, at: DateTime<Utc>) -> Result<Option<EventMark>> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records.get_mut(&id).map(|record| {
            let first = record.clicked_at.is_none();
            if first {
                record.clicked_at = Some(at);
            }
            EventMark {
                record: record.clone(),
                first,
            }
        }))
    }

    async fn get(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>> {
        Ok(self.records.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn count_for_recipient_since(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .values()
            .filter(|r| r.recipient == recipient && r.created_at >= since)
            .count() as u64)
    }
}

// ---------------------------------------------------------------------------
// Experiments
// ---------------------------------------------------------------------------

/// Live counters for one variant, incremented lock-free.
#[derive(Default)]
struct VariantCounters {
    sent: AtomicU64,
    opens: AtomicU64,
    clicks: AtomicU64,
}

impl VariantCounters {
    fn field(&self, field: CounterField) -> &AtomicU64 {
        match field {
            CounterField::Sent => &self.sent,
            CounterField::Opens => &self.opens,
            CounterField::Clicks => &self.clicks,
        }
    }

    fn snapshot(&self) -> VariantStats {
        VariantStats {
            sent: self.sent.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
            clicks: self.clicks.load(Ordering::Relaxed),
        }
    }
}

/// Frozen outcome stored when an experiment ends.
struct ExperimentOutcome {
    winner: Option<Variant>,
    confidence: u8,
    ended_at: DateTime<Utc>,
}

struct ExperimentRow {
    id: ExperimentId,
    name: String,
    category: String,
    variant_a: VariantContent,
    variant_b: VariantContent,
    traffic_split: u8,
    counters_a: VariantCounters,
    counters_b: VariantCounters,
    active: AtomicBool,
    outcome: Mutex<Option<ExperimentOutcome>>,
    created_at: DateTime<Utc>,
}

impl ExperimentRow {
    fn counters(&self, variant: Variant) -> &VariantCounters {
        match variant {
            Variant::A => &self.counters_a,
            Variant::B => &self.counters_b,
        }
    }

    fn snapshot(&self) -> Result<Experiment> {
        let outcome = self.outcome.lock().map_err(poisoned)?;
        Ok(Experiment {
            id: self.id,
            name: self.name.clone(),
            category: self.category.clone(),
            variant_a: self.variant_a.clone(),
            variant_b: self.variant_b.clone(),
            traffic_split: self.traffic_split,
            stats_a: self.counters_a.snapshot(),
            stats_b: self.counters_b.snapshot(),
            active: self.active.load(Ordering::Acquire),
            winner: outcome.as_ref().and_then(|o| o.winner),
            confidence: outcome.as_ref().map_or(0, |o| o.confidence),
            created_at: self.created_at,
            ended_at: outcome.as_ref().map(|o| o.ended_at),
        })
    }
}

/// In-memory experiment store.
#[derive(Default)]
pub struct MemoryExperimentStore {
    rows: RwLock<HashMap<ExperimentId, Arc<ExperimentRow>>>,
    next_id: AtomicU64,
}

impl MemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, id: ExperimentId) -> Result<Option<Arc<ExperimentRow>>> {
        Ok(self.rows.read().map_err(poisoned)?.get(&id).cloned())
    }
}

#[async_trait]
impl ExperimentStore for MemoryExperimentStore {
    async fn create(&self, def: NewExperiment, now: DateTime<Utc>) -> Result<Experiment> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let row = Arc::new(ExperimentRow {
            id,
            name: def.name,
            category: def.category,
            variant_a: def.variant_a,
            variant_b: def.variant_b,
            traffic_split: def.traffic_split.min(100),
            counters_a: VariantCounters::default(),
            counters_b: VariantCounters::default(),
            active: AtomicBool::new(true),
            outcome: Mutex::new(None),
            created_at: now,
        });
        let snapshot = row.snapshot()?;
        self.rows.write().map_err(poisoned)?.insert(id, row);
        Ok(snapshot)
    }

    async fn get(&self, id: ExperimentId) -> Result<Option<Experiment>> {
        match self.row(id)? {
            Some(row) => Ok(Some(row.snapshot()?)),
            None => Ok(None),
        }
    }

    async fn active_for_category(&self, category: &str) -> Result<Option<Experiment>> {
        let rows = self.rows.read().map_err(poisoned)?;
        let best = rows
            .values()
            .filter(|row| row.category == category && row.active.load(Ordering::Acquire))
            // Most-recently-created wins; id breaks created_at ties.
            .max_by_key(|row| (row.created_at, row.id))
            .cloned();
        drop(rows);
        match best {
            Some(row) => Ok(Some(row.snapshot()?)),
            None => Ok(None),
        }
    }

    async fn list_active(&self) -> Result<Vec<Experiment>> {
        let rows: Vec<Arc<ExperimentRow>> = self
            .rows
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|row| row.active.load(Ordering::Acquire))
            .cloned()
            .collect();
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(row.snapshot()?);
        }
        snapshots.sort_by_key(|e| e.id);
        Ok(snapshots)
    }

    async fn increment(
        &self,
        id: ExperimentId,
        variant: Variant,
        field: CounterField,
    ) -> Result<()> {
        match self.row(id)? {
            Some(row) => {
                row.counters(variant).field(field).fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(Error::ExperimentNotFound(id)),
        }
    }

    async fn end_if_active(
        &self,
        id: ExperimentId,
        winner: Option<Variant>,
        confidence: u8,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(row) = self.row(id)? else {
            return Err(Error::ExperimentNotFound(id));
        };
        // CAS makes ending idempotent: exactly one of any number of
        // concurrent sweeps wins the transition.
        let won = row
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            *row.outcome.lock().map_err(poisoned)? = Some(ExperimentOutcome {
                winner,
                confidence,
                ended_at: at,
            });
        }
        Ok(won)
    }
}

// ---------------------------------------------------------------------------
// Send-time profiles
// ---------------------------------------------------------------------------

/// In-memory profile store.
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, SendTimeProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SendTimeProfileStore for MemoryProfileStore {
    async fn get(&self, recipient_id: &str) -> Result<Option<SendTimeProfile>> {
        Ok(self
            .profiles
            .read()
            .map_err(poisoned)?
            .get(recipient_id)
            .cloned())
    }

    async fn upsert(&self, profile: SendTimeProfile) -> Result<()> {
        self.profiles
            .write()
            .map_err(poisoned)?
            .insert(profile.recipient_id.clone(), profile);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_CATEGORY;

    fn draft(recipient: &str, at: DateTime<Utc>) -> DeliveryDraft {
        DeliveryDraft {
            recipient: recipient.to_string(),
            owner_user_id: None,
            category: DEFAULT_CATEGORY.to_string(),
            experiment: None,
            created_at: at,
        }
    }

    fn experiment_def(name: &str, category: &str) -> NewExperiment {
        NewExperiment::new(
            name,
            category,
            VariantContent::subject("a"),
            VariantContent::subject("b"),
        )
    }

    #[tokio::test]
    async fn test_record_lifecycle_single_terminal_transition() {
        let store = MemoryDeliveryStore::new();
        let now = Utc::now();

        let record = store.create(draft("a@b.com", now)).await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Pending);

        store
            .mark_delivered(record.id, Some("msg_1".to_string()), now)
            .await
            .unwrap();
        // Second terminal transition is ignored.
        store
            .mark_failed(record.id, "late failure".to_string(), now)
            .await
            .unwrap();

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
        assert_eq!(stored.provider_message_id.as_deref(), Some("msg_1"));
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn test_open_mark_is_first_only_once() {
        let store = MemoryDeliveryStore::new();
        let now = Utc::now();
        let record = store.create(draft("a@b.com", now)).await.unwrap();

        let first = store.mark_opened(record.id, now).await.unwrap().unwrap();
        assert!(first.first);

        let second = store.mark_opened(record.id, now).await.unwrap().unwrap();
        assert!(!second.first);
        assert_eq!(second.record.opened_at, first.record.opened_at);
    }

    #[tokio::test]
    async fn test_count_for_recipient_window() {
        let store = MemoryDeliveryStore::new();
        let now = Utc::now();

        store.create(draft("a@b.com", now)).await.unwrap();
        store
            .create(draft("a@b.com", now - chrono::Duration::hours(30)))
            .await
            .unwrap();
        store.create(draft("other@b.com", now)).await.unwrap();

        let day = store
            .count_for_recipient_since("a@b.com", now - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(day, 1);

        let week = store
            .count_for_recipient_since("a@b.com", now - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(week, 2);
    }

    #[tokio::test]
    async fn test_active_for_category_most_recent_wins() {
        let store = MemoryExperimentStore::new();
        let base = Utc::now();

        store
            .create(experiment_def("older", "MATCH"), base)
            .await
            .unwrap();
        let newer = store
            .create(
                experiment_def("newer", "MATCH"),
                base + chrono::Duration::minutes(1),
            )
            .await
            .unwrap();
        store
            .create(experiment_def("other category", "DIGEST"), base)
            .await
            .unwrap();

        let active = store.active_for_category("MATCH").await.unwrap().unwrap();
        assert_eq!(active.id, newer.id);
        assert_eq!(active.name, "newer");

        assert!(store.active_for_category("UNKNOWN").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let store = Arc::new(MemoryExperimentStore::new());
        let exp = store
            .create(experiment_def("load", "MATCH"), Utc::now())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let id = exp.id;
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    store
                        .increment(id, Variant::A, CounterField::Sent)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = store.get(exp.id).await.unwrap().unwrap();
        assert_eq!(stored.stats_a.sent, 2000);
    }

    #[tokio::test]
    async fn test_end_if_active_is_idempotent() {
        let store = MemoryExperimentStore::new();
        let now = Utc::now();
        let exp = store.create(experiment_def("cas", "MATCH"), now).await.unwrap();

        let first = store
            .end_if_active(exp.id, Some(Variant::B), 95, now)
            .await
            .unwrap();
        let second = store
            .end_if_active(exp.id, Some(Variant::A), 99, now)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);

        // The losing call must not overwrite the stored outcome.
        let stored = store.get(exp.id).await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.winner, Some(Variant::B));
        assert_eq!(stored.confidence, 95);
        assert!(stored.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_increment_unknown_experiment_errors() {
        let store = MemoryExperimentStore::new();
        let err = store
            .increment(999, Variant::A, CounterField::Opens)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExperimentNotFound(999)));
    }

    #[tokio::test]
    async fn test_profile_roundtrip() {
        let store = MemoryProfileStore::new();
        assert!(store.get("user-1").await.unwrap().is_none());

        let mut profile = SendTimeProfile::new("user-1", 19, Utc::now());
        profile.observe_open(9, Utc::now());
        store.upsert(profile).await.unwrap();

        let stored = store.get("user-1").await.unwrap().unwrap();
        assert_eq!(stored.optimal_hour, 9);
        assert_eq!(stored.data_points, 1);
    }
}
