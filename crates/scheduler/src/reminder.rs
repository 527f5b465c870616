//! Reminder Scanner.
//!
//! Re-sends every delivered occurrence that is still unanswered once its
//! grace period has passed. Nothing is marked: an occurrence keeps being
//! reminded on every tick until an answer exists. Candidates are not
//! batched, so one whose template left the catalog is skipped without
//! delaying the others.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulse_notify::templating::MessageContext;
use pulse_notify::{MessageRenderer, Notifier};
use pulse_store::ScheduleStore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::TemplateCatalog;
use crate::delivery::{deliver_with_timeout, DEFAULT_DELIVERY_TIMEOUT};
use crate::error::SchedulerError;
use crate::metrics::TickReport;
use crate::runner::PeriodicJob;

pub struct ReminderScanner {
    store: Arc<dyn ScheduleStore>,
    catalog: Arc<TemplateCatalog>,
    notifier: Arc<dyn Notifier>,
    renderer: MessageRenderer,
    grace: chrono::Duration,
    timeout: Duration,
}

impl ReminderScanner {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        catalog: Arc<TemplateCatalog>,
        notifier: Arc<dyn Notifier>,
        renderer: MessageRenderer,
        grace: chrono::Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            notifier,
            renderer,
            grace,
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        self.scan(Uuid::new_v4(), now).await
    }

    #[instrument(name = "reminder_tick", skip_all, fields(tick_id = %tick_id))]
    async fn scan(&self, tick_id: Uuid, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let mut report = TickReport::new(tick_id);
        let cutoff = now - self.grace;
        let candidates = self.store.reminder_candidates(cutoff).await?;
        report.examined = candidates.len();
        debug!(%cutoff, candidates = candidates.len(), "reminder scan");

        for occurrence in &candidates {
            let Some(template) = self.catalog.template(occurrence.template_id) else {
                warn!(
                    occurrence_id = occurrence.occurrence_id,
                    participant_id = occurrence.participant_id,
                    template_id = occurrence.template_id,
                    "question template missing from catalog, skipping reminder"
                );
                report.skipped += 1;
                continue;
            };

            let ctx = MessageContext::new(template, occurrence.scheduled_at);
            let text = match self.renderer.render_reminder(&ctx) {
                Ok(text) => text,
                Err(e) => {
                    warn!(occurrence_id = occurrence.occurrence_id, error = %e, "failed to render reminder");
                    report.failed += 1;
                    continue;
                }
            };

            match deliver_with_timeout(
                self.notifier.as_ref(),
                self.timeout,
                occurrence.participant_id,
                &text,
                &template.affordances(),
            )
            .await
            {
                Ok(()) => {
                    info!(
                        occurrence_id = occurrence.occurrence_id,
                        participant_id = occurrence.participant_id,
                        template_id = template.id,
                        "reminder sent"
                    );
                    report.sent += 1;
                }
                Err(e) => {
                    warn!(
                        occurrence_id = occurrence.occurrence_id,
                        participant_id = occurrence.participant_id,
                        template_id = template.id,
                        error = %e,
                        "reminder failed"
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[async_trait::async_trait]
impl PeriodicJob for ReminderScanner {
    fn name(&self) -> &str {
        "reminder"
    }

    async fn run_once(&self) -> Result<TickReport, SchedulerError> {
        self.run_at(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryScanner;
    use crate::testing::{catalog_without, enroll, first_template, t0, RecordingNotifier};
    use chrono::Duration as ChronoDuration;
    use pulse_store::MemoryStore;
    use std::sync::atomic::Ordering;

    async fn delivered_once() -> (Arc<MemoryStore>, Arc<TemplateCatalog>) {
        let (store, catalog) = enroll("1 month").await;
        let silent = Arc::new(RecordingNotifier::new());
        DeliveryScanner::new(store.clone(), catalog.clone(), silent, MessageRenderer::default())
            .run_at(t0())
            .await
            .unwrap();
        (store, catalog)
    }

    fn reminder(
        store: Arc<MemoryStore>,
        catalog: Arc<TemplateCatalog>,
        notifier: Arc<RecordingNotifier>,
    ) -> ReminderScanner {
        ReminderScanner::new(
            store,
            catalog,
            notifier,
            MessageRenderer::default(),
            ChronoDuration::hours(24),
        )
    }

    #[tokio::test]
    async fn nothing_inside_grace_period() {
        let (store, catalog) = delivered_once().await;
        let notifier = Arc::new(RecordingNotifier::new());
        let scanner = reminder(store, catalog, notifier.clone());

        let report = scanner.run_at(t0() + ChronoDuration::hours(23)).await.unwrap();
        assert_eq!(report.examined, 0);
        // delivered_at == now - grace is not strictly older than the cutoff.
        let report = scanner.run_at(t0() + ChronoDuration::hours(24)).await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reminds_every_tick_until_answered() {
        let (store, catalog) = delivered_once().await;
        let notifier = Arc::new(RecordingNotifier::new());
        let scanner = reminder(store.clone(), catalog, notifier.clone());
        let later = t0() + ChronoDuration::hours(25);

        assert_eq!(scanner.run_at(later).await.unwrap().sent, 1);
        assert_eq!(scanner.run_at(later).await.unwrap().sent, 1);
        let messages = notifier.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].1, "REMINDER: How are you feeling today?");

        let pending = store.latest_pending(42).await.unwrap().unwrap();
        store.insert_answer(pending.occurrence_id, "Good", later).await.unwrap();
        assert_eq!(scanner.run_at(later).await.unwrap().examined, 0);
    }

    #[tokio::test]
    async fn failed_reminder_does_not_abort_tick() {
        let (store, catalog) = delivered_once().await;
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.fail_next(1);
        let scanner = reminder(store, catalog, notifier.clone());

        let report = scanner.run_at(t0() + ChronoDuration::days(2)).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 0);
    }

    #[tokio::test]
    async fn missing_template_is_skipped_and_others_still_reminded() {
        let (store, full) = enroll("1 month").await;
        let silent = Arc::new(RecordingNotifier::new());
        let delivered =
            DeliveryScanner::new(store.clone(), full.clone(), silent, MessageRenderer::default())
                .run_at(t0() + ChronoDuration::days(10))
                .await
                .unwrap();
        // Eleven daily questions plus the first medication check.
        assert_eq!(delivered.sent, 12);

        let catalog = catalog_without(&store, first_template(&full, "1 month")).await;
        let notifier = Arc::new(RecordingNotifier::new());
        let scanner = reminder(store, catalog, notifier.clone());

        let report = scanner.run_at(t0() + ChronoDuration::days(12)).await.unwrap();
        assert_eq!(report.examined, 12);
        assert_eq!(report.skipped, 11);
        assert_eq!(report.sent, 1);
        let messages = notifier.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1, "REMINDER: Did you take your medication regularly?");
        assert_eq!(messages[0].2, pulse_core::Affordances::YesNo);
    }
}
