//! Engine facade wiring governance, experimentation and delivery.
//!
//! Dispatch flow for one notification: the frequency governor decides
//! whether sending is allowed now (capped or quiet-hour sends are skipped
//! or deferred silently, never failed), the experiment coordinator resolves
//! the active variant, the caller-supplied renderer produces the final
//! subject and bodies, and the mailer transmits. Open/click events flow
//! back through `ingest_open`/`ingest_click` into the delivery record, the
//! experiment counters and the send-time model.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::{AdminDirectory, EngineConfig};
use crate::delivery::Mailer;
use crate::errors::Result;
use crate::experiment::{ExperimentCoordinator, ResolvedVariant};
use crate::personalization::{deferral_until, FrequencyGovernor, SendTimeOptimizer};
use crate::provider::{HttpProvider, MailProvider};
use crate::store::{
    DeliveryRecordStore, ExperimentStore, MemoryDeliveryStore, MemoryExperimentStore,
    MemoryProfileStore, SendTimeProfileStore,
};
use crate::types::{
    DeliveryId, ExperimentRef, FrequencyPolicy, SendRequest, SendResult,
};

/// A notification target.
#[derive(Debug, Clone)]
pub struct Recipient {
    /// Verified email address; an empty address is a precondition skip
    pub address: String,
    /// Platform user id, when known. Used as the experiment/learning key.
    pub user_id: Option<String>,
    /// Display name for cosmetic copy
    pub display_name: Option<String>,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user_id: None,
            display_name: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Stable key for variant assignment and send-time learning.
    fn key(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.address)
    }
}

/// Rendered message parts produced by the external template layer.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Why a dispatch produced no send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Recipient has no usable address
    MissingAddress,
    /// Daily or weekly frequency cap reached
    FrequencyCapped,
    /// Inside the quiet-hour window; retry at the given instant
    QuietHours { resume_at: DateTime<Utc> },
}

/// Outcome of one dispatch.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// A send was attempted; inspect the result for success/failure
    Sent(SendResult),
    /// Precondition skip; expected and frequent, logged only
    Skipped(SkipReason),
}

/// Top-level engine tying the three components together.
pub struct Engine {
    config: EngineConfig,
    mailer: Mailer,
    coordinator: ExperimentCoordinator,
    optimizer: SendTimeOptimizer,
    governor: FrequencyGovernor,
    records: Arc<dyn DeliveryRecordStore>,
    admin_directory: Option<Arc<dyn AdminDirectory>>,
}

impl Engine {
    /// Assemble an engine from explicit parts.
    pub fn new(
        config: EngineConfig,
        records: Arc<dyn DeliveryRecordStore>,
        experiments: Arc<dyn ExperimentStore>,
        profiles: Arc<dyn SendTimeProfileStore>,
    ) -> Self {
        let provider: Option<Arc<dyn MailProvider>> = config
            .api_key
            .as_ref()
            .map(|key| {
                Arc::new(HttpProvider::new(key.clone(), config.base_url.clone()))
                    as Arc<dyn MailProvider>
            });
        let mailer = Mailer::new(provider, Arc::clone(&records), config.from_address.clone());
        let coordinator = ExperimentCoordinator::new(experiments);
        let optimizer = SendTimeOptimizer::new(profiles, config.default_send_hour);
        let governor = FrequencyGovernor::new(Arc::clone(&records));
        Self {
            config,
            mailer,
            coordinator,
            optimizer,
            governor,
            records,
            admin_directory: None,
        }
    }

    /// Attach a user directory used as the fallback source of admin
    /// notification recipients when none are configured.
    pub fn with_admin_directory(mut self, directory: Arc<dyn AdminDirectory>) -> Self {
        self.admin_directory = Some(directory);
        self
    }

    /// Engine backed entirely by in-memory stores.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryDeliveryStore::new()),
            Arc::new(MemoryExperimentStore::new()),
            Arc::new(MemoryProfileStore::new()),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    pub fn experiments(&self) -> &ExperimentCoordinator {
        &self.coordinator
    }

    pub fn send_times(&self) -> &SendTimeOptimizer {
        &self.optimizer
    }

    /// Dispatch one notification: governance gate, variant resolution,
    /// render, send, fire-and-forget sent counter.
    pub async fn dispatch<F>(
        &self,
        recipient: &Recipient,
        category: &str,
        policy: &FrequencyPolicy,
        render: F,
    ) -> Result<DispatchOutcome>
    where
        F: FnOnce(&ResolvedVariant) -> RenderedEmail,
    {
        let now = Utc::now();

        if recipient.address.trim().is_empty() {
            info!(category, "skipping send: recipient has no address");
            return Ok(DispatchOutcome::Skipped(SkipReason::MissingAddress));
        }

        if self
            .governor
            .is_capped(&recipient.address, policy, now)
            .await?
        {
            info!(
                recipient = %recipient.address,
                category,
                "skipping send: frequency cap reached"
            );
            return Ok(DispatchOutcome::Skipped(SkipReason::FrequencyCapped));
        }

        if let Some(resume_at) = deferral_until(policy, now) {
            info!(
                recipient = %recipient.address,
                category,
                resume_at = %resume_at,
                "deferring send: quiet hours"
            );
            return Ok(DispatchOutcome::Skipped(SkipReason::QuietHours {
                resume_at,
            }));
        }

        let resolved = self
            .coordinator
            .resolve_variant(category, recipient.key())
            .await?;
        let rendered = render(&resolved);

        let mut request = SendRequest::new(
            recipient.address.clone(),
            rendered.subject,
            rendered.html,
            rendered.text,
        )
        .with_category(category);
        if let Some(user_id) = &recipient.user_id {
            request = request.with_owner(user_id.clone());
        }
        if let Some(experiment_id) = resolved.experiment_id {
            request = request.with_experiment(ExperimentRef {
                id: experiment_id,
                variant: resolved.variant,
            });
        }

        let result = self.mailer.send(request).await;

        // Counter recording is best-effort relative to the send path.
        if result.success {
            if let Some(experiment_id) = resolved.experiment_id {
                if let Err(e) = self
                    .coordinator
                    .record_sent(experiment_id, resolved.variant)
                    .await
                {
                    warn!(experiment_id, error = %e, "failed to record sent counter");
                }
            }
        }

        Ok(DispatchOutcome::Sent(result))
    }

    /// Ingest an open event from the tracking collaborator.
    ///
    /// Stamps the record, feeds the experiment open counter and the
    /// send-time model. Duplicate events are ignored.
    pub async fn ingest_open(&self, delivery_id: DeliveryId) -> Result<()> {
        let now = Utc::now();
        let Some(mark) = self.records.mark_opened(delivery_id, now).await? else {
            warn!(delivery_id, "open event for unknown delivery");
            return Ok(());
        };
        if !mark.first {
            return Ok(());
        }

        if let Some(reference) = mark.record.experiment {
            if let Err(e) = self
                .coordinator
                .record_open(reference.id, reference.variant)
                .await
            {
                warn!(
                    delivery_id,
                    experiment_id = reference.id,
                    error = %e,
                    "failed to record open counter"
                );
            }
        }

        let learner_key = mark
            .record
            .owner_user_id
            .as_deref()
            .unwrap_or(&mark.record.recipient);
        self.optimizer
            .record_open(learner_key, mark.record.created_at, now)
            .await
    }

    /// Ingest a click event from the tracking collaborator.
    pub async fn ingest_click(&self, delivery_id: DeliveryId) -> Result<()> {
        let now = Utc::now();
        let Some(mark) = self.records.mark_clicked(delivery_id, now).await? else {
            warn!(delivery_id, "click event for unknown delivery");
            return Ok(());
        };
        if !mark.first {
            return Ok(());
        }

        if let Some(reference) = mark.record.experiment {
            if let Err(e) = self
                .coordinator
                .record_click(reference.id, reference.variant)
                .await
            {
                warn!(
                    delivery_id,
                    experiment_id = reference.id,
                    error = %e,
                    "failed to record click counter"
                );
            }
        }
        Ok(())
    }

    /// Run one auto-end sweep over active experiments. Intended to be
    /// scheduled periodically (e.g. hourly) by the host application.
    pub async fn run_auto_end_sweep(&self) -> Result<usize> {
        self.coordinator.auto_end_eligible().await
    }

    /// Send a plain notification to every admin recipient. Recipients come
    /// from configuration, falling back to the attached directory when none
    /// are configured. Admin mail bypasses frequency governance.
    pub async fn notify_admins(&self, subject: &str, html: &str, text: &str) -> Vec<SendResult> {
        let admins = match &self.admin_directory {
            Some(directory) => self.config.admin_recipients_or(directory.as_ref()),
            None => self.config.admin_recipients.clone(),
        };
        let mut results = Vec::with_capacity(admins.len());
        for admin in &admins {
            let request = SendRequest::new(admin.clone(), subject, html, text)
                .with_category("ADMIN");
            results.push(self.mailer.send(request).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewExperiment, Variant, VariantContent};

    fn render(resolved: &ResolvedVariant) -> RenderedEmail {
        let subject = if resolved.content.subject_line.is_empty() {
            "Default subject".to_string()
        } else {
            resolved.content.subject_line.clone()
        };
        RenderedEmail {
            subject,
            html: "<p>body</p>".to_string(),
            text: "body".to_string(),
        }
    }

    fn engine() -> Engine {
        Engine::in_memory(EngineConfig::default())
    }

    fn recipient(n: u32) -> Recipient {
        Recipient::new(format!("user{n}@example.com")).with_user_id(format!("user-{n}"))
    }

    async fn dispatch_ok(engine: &Engine, recipient: &Recipient, category: &str) -> SendResult {
        match engine
            .dispatch(recipient, category, &FrequencyPolicy::default(), render)
            .await
            .unwrap()
        {
            DispatchOutcome::Sent(result) => result,
            DispatchOutcome::Skipped(reason) => panic!("unexpected skip: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_dry_run_succeeds() {
        let engine = engine();
        let result = dispatch_ok(&engine, &recipient(1), "MATCH").await;
        assert!(result.success);
        assert!(result.delivery_id.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_skips_missing_address() {
        let engine = engine();
        let ghost = Recipient::new("");
        let outcome = engine
            .dispatch(&ghost, "MATCH", &FrequencyPolicy::default(), render)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Skipped(SkipReason::MissingAddress)
        ));
    }

    #[tokio::test]
    async fn test_dispatch_respects_frequency_cap() {
        let engine = engine();
        let target = recipient(2);

        // Default cap is 2/day; the third dispatch must skip.
        dispatch_ok(&engine, &target, "MATCH").await;
        dispatch_ok(&engine, &target, "MATCH").await;

        let outcome = engine
            .dispatch(&target, "MATCH", &FrequencyPolicy::default(), render)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Skipped(SkipReason::FrequencyCapped)
        ));
    }

    #[tokio::test]
    async fn test_dispatch_records_sent_counter() {
        let engine = engine();
        let experiment = engine
            .experiments()
            .create_experiment(NewExperiment::new(
                "subject test",
                "MATCH",
                VariantContent::subject("a"),
                VariantContent::subject("b"),
            ))
            .await
            .unwrap();

        dispatch_ok(&engine, &recipient(3), "MATCH").await;

        let analysis = engine.experiments().analyze(experiment.id).await.unwrap();
        assert_eq!(analysis.stats_a.sent + analysis.stats_b.sent, 1);
    }

    #[tokio::test]
    async fn test_open_feedback_reaches_experiment_and_model() {
        let engine = engine();
        engine
            .experiments()
            .create_experiment(NewExperiment::new(
                "subject test",
                "MATCH",
                VariantContent::subject("a"),
                VariantContent::subject("b"),
            ))
            .await
            .unwrap();

        let target = recipient(4);
        let result = dispatch_ok(&engine, &target, "MATCH").await;
        let delivery_id = result.delivery_id.unwrap();

        engine.ingest_open(delivery_id).await.unwrap();
        // Duplicate event is ignored.
        engine.ingest_open(delivery_id).await.unwrap();

        let experiment = engine
            .experiments()
            .active_for_category("MATCH")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(experiment.stats_a.opens + experiment.stats_b.opens, 1);

        let confidence = engine.send_times().confidence("user-4").await.unwrap();
        assert!(confidence > 0.0, "open must feed the send-time model");
    }

    #[tokio::test]
    async fn test_click_feedback() {
        let engine = engine();
        engine
            .experiments()
            .create_experiment(NewExperiment::new(
                "cta test",
                "MATCH",
                VariantContent::subject("a"),
                VariantContent::subject("b"),
            ))
            .await
            .unwrap();

        let result = dispatch_ok(&engine, &recipient(5), "MATCH").await;
        engine.ingest_click(result.delivery_id.unwrap()).await.unwrap();

        let experiment = engine
            .experiments()
            .active_for_category("MATCH")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(experiment.stats_a.clicks + experiment.stats_b.clicks, 1);
    }

    #[tokio::test]
    async fn test_same_recipient_same_variant_across_dispatches() {
        let engine = engine();
        engine
            .experiments()
            .create_experiment(NewExperiment::new(
                "stability",
                "DIGEST",
                VariantContent::subject("a"),
                VariantContent::subject("b"),
            ))
            .await
            .unwrap();

        let mut variants: Vec<Variant> = Vec::new();
        for _ in 0..2 {
            let resolved = engine
                .experiments()
                .resolve_variant("DIGEST", "user-9")
                .await
                .unwrap();
            variants.push(resolved.variant);
        }
        assert_eq!(variants[0], variants[1]);
    }

    #[tokio::test]
    async fn test_notify_admins_uses_configured_recipients() {
        let config = EngineConfig {
            admin_recipients: vec![
                "ops@example.com".to_string(),
                "oncall@example.com".to_string(),
            ],
            ..EngineConfig::default()
        };
        let engine = Engine::in_memory(config);

        let results = engine
            .notify_admins("Delivery failures", "<p>3 failed</p>", "3 failed")
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_notify_admins_falls_back_to_directory() {
        struct FixedDirectory;

        impl AdminDirectory for FixedDirectory {
            fn emails_for_role(&self, _role: &str) -> Vec<String> {
                vec!["db-admin@example.com".to_string()]
            }
        }

        // No recipients configured: the attached directory supplies them.
        let engine = Engine::in_memory(EngineConfig::default())
            .with_admin_directory(Arc::new(FixedDirectory));

        let results = engine
            .notify_admins("Delivery failures", "<p>3 failed</p>", "3 failed")
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }
}
