//! Delivery Scanner.
//!
//! Each tick reads the due, undelivered occurrences and, one at a time,
//! claims, delivers, then confirms the claim or releases it on failure. The
//! claim is a conditional store update committed before the channel is
//! called, so two overlapping ticks can never both send the same occurrence,
//! and no lock is held across the network call. While a claim is in flight
//! the occurrence cannot be answered or reminded.
//!
//! An occurrence whose message cannot be built (template missing from the
//! catalog, or a render error) is held in the store. Held rows leave the due
//! set, so they never crowd valid occurrences out of a batch; an operator
//! clears the hold once the catalog is fixed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulse_core::{Affordances, DueOccurrence, ParticipantId};
use pulse_notify::templating::MessageContext;
use pulse_notify::{MessageRenderer, Notifier, NotifyError};
use pulse_store::ScheduleStore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::TemplateCatalog;
use crate::error::SchedulerError;
use crate::metrics::TickReport;
use crate::runner::PeriodicJob;

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_BATCH_LIMIT: u32 = 500;

/// Extra age, beyond the delivery timeout, before an in-flight claim is
/// treated as left behind by an interrupted tick.
const STALE_CLAIM_MARGIN_MINUTES: i64 = 5;

/// Call `deliver`, turning an expired timeout into [`NotifyError::Timeout`].
pub(crate) async fn deliver_with_timeout(
    notifier: &dyn Notifier,
    timeout: Duration,
    recipient: ParticipantId,
    text: &str,
    affordances: &Affordances,
) -> Result<(), NotifyError> {
    match tokio::time::timeout(timeout, notifier.deliver(recipient, text, affordances)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout(timeout)),
    }
}

pub struct DeliveryScanner {
    store: Arc<dyn ScheduleStore>,
    catalog: Arc<TemplateCatalog>,
    notifier: Arc<dyn Notifier>,
    renderer: MessageRenderer,
    timeout: Duration,
    batch_limit: u32,
}

impl DeliveryScanner {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        catalog: Arc<TemplateCatalog>,
        notifier: Arc<dyn Notifier>,
        renderer: MessageRenderer,
    ) -> Self {
        Self {
            store,
            catalog,
            notifier,
            renderer,
            timeout: DEFAULT_DELIVERY_TIMEOUT,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_batch_limit(mut self, limit: u32) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Run one tick as if the clock read `now`.
    ///
    /// Returns `Err` only when the store fails while settling, listing,
    /// claiming or holding; the rest of that tick is abandoned and retried
    /// wholesale next time.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        self.scan(Uuid::new_v4(), now).await
    }

    /// Claims taken before this instant can no longer be in a live tick.
    fn stale_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let age = chrono::Duration::from_std(self.timeout)
            .ok()?
            .checked_add(&chrono::Duration::minutes(STALE_CLAIM_MARGIN_MINUTES))?;
        now.checked_sub_signed(age)
    }

    #[instrument(name = "delivery_tick", skip_all, fields(tick_id = %tick_id))]
    async fn scan(&self, tick_id: Uuid, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let mut report = TickReport::new(tick_id);
        if let Some(cutoff) = self.stale_cutoff(now) {
            report.settled = self.store.settle_stale_claims(cutoff).await?;
            if report.settled > 0 {
                warn!(
                    settled = report.settled,
                    %cutoff,
                    "confirmed claims left in flight by an interrupted tick"
                );
            }
        }

        let due = self.store.due_occurrences(now, self.batch_limit).await?;
        report.examined = due.len();
        if due.is_empty() {
            debug!("no due occurrences");
            return Ok(report);
        }

        for occurrence in &due {
            self.deliver_one(occurrence, now, &mut report).await?;
        }
        Ok(report)
    }

    async fn deliver_one(
        &self,
        occurrence: &DueOccurrence,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), SchedulerError> {
        let Some(template) = self.catalog.template(occurrence.template_id) else {
            warn!(
                occurrence_id = occurrence.occurrence_id,
                participant_id = occurrence.participant_id,
                template_id = occurrence.template_id,
                "question template missing from catalog, holding occurrence"
            );
            return self.hold(occurrence, now, report).await;
        };

        let ctx = MessageContext::new(template, occurrence.scheduled_at);
        let text = match self.renderer.render_question(&ctx) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    occurrence_id = occurrence.occurrence_id,
                    template_id = template.id,
                    error = %e,
                    "failed to render question, holding occurrence"
                );
                return self.hold(occurrence, now, report).await;
            }
        };

        if !self
            .store
            .claim_occurrence(occurrence.occurrence_id, now)
            .await?
        {
            debug!(
                occurrence_id = occurrence.occurrence_id,
                "occurrence already claimed by another tick"
            );
            report.already_claimed += 1;
            return Ok(());
        }

        let result = deliver_with_timeout(
            self.notifier.as_ref(),
            self.timeout,
            occurrence.participant_id,
            &text,
            &template.affordances(),
        )
        .await;

        match result {
            Ok(()) => {
                info!(
                    occurrence_id = occurrence.occurrence_id,
                    participant_id = occurrence.participant_id,
                    template_id = template.id,
                    channel = self.notifier.channel_name(),
                    "question delivered"
                );
                report.sent += 1;
                self.confirm(occurrence).await;
            }
            Err(e) => {
                warn!(
                    occurrence_id = occurrence.occurrence_id,
                    participant_id = occurrence.participant_id,
                    template_id = template.id,
                    error = %e,
                    "delivery failed, releasing claim"
                );
                report.failed += 1;
                self.release(occurrence, report).await;
            }
        }
        Ok(())
    }

    async fn hold(
        &self,
        occurrence: &DueOccurrence,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), SchedulerError> {
        if self
            .store
            .hold_occurrence(occurrence.occurrence_id, now)
            .await?
        {
            report.skipped += 1;
        } else {
            debug!(
                occurrence_id = occurrence.occurrence_id,
                "occurrence claimed or held by another tick"
            );
            report.already_claimed += 1;
        }
        Ok(())
    }

    /// A failed confirmation leaves the claim in flight until a later tick
    /// settles it; the message is not sent again either way.
    async fn confirm(&self, occurrence: &DueOccurrence) {
        match self.store.confirm_delivery(occurrence.occurrence_id).await {
            Ok(true) => {}
            Ok(false) => warn!(
                occurrence_id = occurrence.occurrence_id,
                "claim was settled before confirmation"
            ),
            Err(e) => error!(
                occurrence_id = occurrence.occurrence_id,
                error = %e,
                "failed to confirm delivery; claim stays in flight until settled"
            ),
        }
    }

    async fn release(&self, occurrence: &DueOccurrence, report: &mut TickReport) {
        match self.store.release_claim(occurrence.occurrence_id).await {
            Ok(true) => {}
            Ok(false) => {
                error!(
                    occurrence_id = occurrence.occurrence_id,
                    participant_id = occurrence.participant_id,
                    "claim not released; occurrence stays delivered"
                );
                report.unreleased += 1;
            }
            Err(e) => {
                error!(
                    occurrence_id = occurrence.occurrence_id,
                    participant_id = occurrence.participant_id,
                    error = %e,
                    "failed to release claim; occurrence stays delivered"
                );
                report.unreleased += 1;
            }
        }
    }
}

#[async_trait::async_trait]
impl PeriodicJob for DeliveryScanner {
    fn name(&self) -> &str {
        "delivery"
    }

    async fn run_once(&self) -> Result<TickReport, SchedulerError> {
        self.run_at(Utc::now()).await
    }
}
