//! The delivery service.
//!
//! One `send` call is one logical send: a `Pending` record is created
//! before the first transmission attempt and transitions to exactly one
//! terminal state, regardless of how many retries happen in between.
//!
//! The retry loop is an explicit state machine so the backoff waits are
//! true async suspensions, sequential per message. Concurrent messages
//! share no mutable state here; experiment counters are the caller's
//! concern.
//!
//! Transmission failures never escape this module as errors: the caller
//! receives a `SendResult` and must check `success`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::errors::ProviderError;
use crate::provider::{MailProvider, OutboundEmail, ProviderReceipt};
use crate::store::DeliveryRecordStore;
use crate::types::{DeliveryDraft, SendRequest, SendResult};

/// First backoff delay in milliseconds (doubles with each retry).
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Backoff cap in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 10_000;

/// Delay before the given retry: `min(1000 * 2^(attempt-1), 10_000)` ms
/// where `attempt` is the 1-based attempt that just failed.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis((INITIAL_BACKOFF_MS << exp).min(MAX_BACKOFF_MS))
}

/// Retry loop state. `Attempting` issues one provider call, `BackingOff`
/// suspends for the computed delay, `Terminal` carries the outcome.
enum SendState {
    Attempting { attempt: u32 },
    BackingOff { next_attempt: u32, delay: Duration },
    Terminal(AttemptOutcome),
}

enum AttemptOutcome {
    Success(ProviderReceipt),
    Failure(String),
}

/// The delivery service.
///
/// When no provider is configured the mailer runs in dry-run mode: message
/// content is logged, the record is marked delivered immediately and the
/// rest of the pipeline (experiments, personalization) can be exercised
/// without a live provider.
pub struct Mailer {
    provider: Option<Arc<dyn MailProvider>>,
    records: Arc<dyn DeliveryRecordStore>,
    from_address: String,
}

impl Mailer {
    pub fn new(
        provider: Option<Arc<dyn MailProvider>>,
        records: Arc<dyn DeliveryRecordStore>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            records,
            from_address: from_address.into(),
        }
    }

    /// Whether sends are logged instead of transmitted.
    pub fn is_dry_run(&self) -> bool {
        self.provider.is_none()
    }

    /// Transmit one rendered message.
    ///
    /// Never returns an error: permanent failures and retry exhaustion are
    /// reported through `SendResult`.
    pub async fn send(&self, request: SendRequest) -> SendResult {
        let draft = DeliveryDraft {
            recipient: request.to.clone(),
            owner_user_id: request.owner_user_id.clone(),
            category: request.category.clone(),
            experiment: request.experiment,
            created_at: Utc::now(),
        };
        let record = match self.records.create(draft).await {
            Ok(record) => record,
            Err(e) => {
                warn!(to = %request.to, error = %e, "failed to create delivery record");
                return SendResult::rejected(e.to_string());
            }
        };

        let Some(provider) = self.provider.as_ref() else {
            info!(
                delivery_id = record.id,
                to = %request.to,
                subject = %request.subject,
                category = %request.category,
                text = %request.text,
                "dry-run delivery (no transmission credential configured)"
            );
            self.finish_delivered(record.id, None).await;
            return SendResult::delivered(record.id, None);
        };

        let email = OutboundEmail {
            from: self.from_address.clone(),
            to: request.to.clone(),
            subject: request.subject.clone(),
            html: request.html.clone(),
            text: request.text.clone(),
        };
        let max_attempts = request.max_retries.max(1);

        let mut state = SendState::Attempting { attempt: 1 };
        let outcome = loop {
            state = match state {
                SendState::Attempting { attempt } => match provider.send(&email).await {
                    Ok(receipt) => SendState::Terminal(AttemptOutcome::Success(receipt)),
                    Err(err) if err.is_retryable() && attempt < max_attempts => {
                        SendState::BackingOff {
                            next_attempt: attempt + 1,
                            delay: backoff_delay(attempt),
                        }
                    }
                    Err(err) => {
                        if err.is_retryable() {
                            warn!(
                                delivery_id = record.id,
                                attempts = attempt,
                                error = %err,
                                "retry budget exhausted"
                            );
                        }
                        SendState::Terminal(AttemptOutcome::Failure(failure_text(&err)))
                    }
                },
                SendState::BackingOff {
                    next_attempt,
                    delay,
                } => {
                    warn!(
                        delivery_id = record.id,
                        next_attempt,
                        max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        "retryable transmission error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    SendState::Attempting {
                        attempt: next_attempt,
                    }
                }
                SendState::Terminal(outcome) => break outcome,
            };
        };

        match outcome {
            AttemptOutcome::Success(receipt) => {
                info!(
                    delivery_id = record.id,
                    to = %request.to,
                    provider_message_id = %receipt.message_id,
                    "message delivered"
                );
                let message_id = (!receipt.message_id.is_empty()).then(|| receipt.message_id);
                self.finish_delivered(record.id, message_id.clone()).await;
                SendResult::delivered(record.id, message_id)
            }
            AttemptOutcome::Failure(error) => {
                warn!(
                    delivery_id = record.id,
                    to = %request.to,
                    error = %error,
                    "message failed"
                );
                if let Err(e) = self
                    .records
                    .mark_failed(record.id, error.clone(), Utc::now())
                    .await
                {
                    warn!(delivery_id = record.id, error = %e, "failed to persist failure");
                }
                SendResult::failed(record.id, error)
            }
        }
    }

    async fn finish_delivered(&self, id: crate::types::DeliveryId, message_id: Option<String>) {
        if let Err(e) = self.records.mark_delivered(id, message_id, Utc::now()).await {
            warn!(delivery_id = id, error = %e, "failed to persist delivery");
        }
    }
}

fn failure_text(err: &ProviderError) -> String {
    match err {
        ProviderError::Permanent { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
