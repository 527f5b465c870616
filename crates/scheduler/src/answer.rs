//! Answer Recorder.
//!
//! Binds a participant's reply to their most recently scheduled delivered,
//! unanswered occurrence, after checking it against that question's options.
//! A question whose send has not returned yet is not a candidate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pulse_core::{Affordances, Answer, OccurrenceId, ParticipantId};
use pulse_store::{ScheduleStore, StoreError};
use tracing::{debug, info};

use crate::catalog::TemplateCatalog;
use crate::error::SchedulerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded(Answer),
    /// The reply is not one of the offered options; nothing was written.
    Rejected {
        occurrence_id: OccurrenceId,
        affordances: Affordances,
    },
    NothingPending,
}

pub struct AnswerRecorder {
    store: Arc<dyn ScheduleStore>,
    catalog: Arc<TemplateCatalog>,
}

impl AnswerRecorder {
    pub fn new(store: Arc<dyn ScheduleStore>, catalog: Arc<TemplateCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Whether the participant has a question waiting for an answer.
    pub async fn has_pending(&self, participant: ParticipantId) -> Result<bool, SchedulerError> {
        Ok(self.store.latest_pending(participant).await?.is_some())
    }

    pub async fn record(
        &self,
        participant: ParticipantId,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, SchedulerError> {
        let Some(pending) = self.store.latest_pending(participant).await? else {
            return Ok(RecordOutcome::NothingPending);
        };
        let template = self
            .catalog
            .template(pending.template_id)
            .ok_or(SchedulerError::TemplateNotLoaded(pending.template_id))?;

        let affordances = template.affordances();
        if !affordances.accepts(raw) {
            debug!(
                participant_id = participant,
                occurrence_id = pending.occurrence_id,
                "answer does not match offered options"
            );
            return Ok(RecordOutcome::Rejected {
                occurrence_id: pending.occurrence_id,
                affordances,
            });
        }

        match self.store.insert_answer(pending.occurrence_id, raw, now).await {
            Ok(answer) => {
                info!(
                    participant_id = participant,
                    occurrence_id = pending.occurrence_id,
                    template_id = template.id,
                    "answer recorded"
                );
                Ok(RecordOutcome::Recorded(answer))
            }
            // A concurrent submission won, or the delivery was rolled back
            // in between; either way this reply has nothing to bind to.
            Err(StoreError::AnswerExists(id)) | Err(StoreError::NotDelivered(id)) => {
                debug!(participant_id = participant, occurrence_id = id, "occurrence no longer pending");
                Ok(RecordOutcome::NothingPending)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryScanner;
    use crate::testing::{enroll, t0, RecordingNotifier};
    use chrono::Duration;
    use pulse_notify::MessageRenderer;

    async fn delivered(track: &str, at: DateTime<Utc>) -> (Arc<pulse_store::MemoryStore>, AnswerRecorder) {
        let (store, catalog) = enroll(track).await;
        DeliveryScanner::new(
            store.clone(),
            catalog.clone(),
            Arc::new(RecordingNotifier::new()),
            MessageRenderer::default(),
        )
        .run_at(at)
        .await
        .unwrap();
        let recorder = AnswerRecorder::new(store.clone(), catalog);
        (store, recorder)
    }

    #[tokio::test]
    async fn nothing_pending_before_delivery() {
        let (store, catalog) = enroll("1 month").await;
        let recorder = AnswerRecorder::new(store, catalog);
        assert_eq!(
            recorder.record(42, "Good", t0()).await.unwrap(),
            RecordOutcome::NothingPending
        );
    }

    #[tokio::test]
    async fn matching_choice_is_recorded_once() {
        let (store, recorder) = delivered("1 month", t0()).await;
        assert!(recorder.has_pending(42).await.unwrap());

        let outcome = recorder.record(42, "Good", t0()).await.unwrap();
        let RecordOutcome::Recorded(answer) = outcome else {
            panic!("expected Recorded, got {outcome:?}");
        };
        assert_eq!(answer.text, "Good");
        assert_eq!(store.answer_for(answer.occurrence_id).await.unwrap(), Some(answer));

        assert_eq!(
            recorder.record(42, "Bad", t0()).await.unwrap(),
            RecordOutcome::NothingPending
        );
    }

    #[tokio::test]
    async fn wrong_case_is_rejected_with_same_options() {
        let (store, recorder) = delivered("1 month", t0()).await;
        let outcome = recorder.record(42, "good", t0()).await.unwrap();
        let RecordOutcome::Rejected { occurrence_id, affordances } = outcome else {
            panic!("expected Rejected, got {outcome:?}");
        };
        assert_eq!(
            affordances.labels(),
            vec!["Very good", "Good", "Satisfactory", "Bad"]
        );
        assert_eq!(store.answer_for(occurrence_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn latest_scheduled_occurrence_is_answered_first() {
        // Days 0, 1, 2 delivered in one tick; the reply binds to day 2.
        let (store, recorder) = delivered("1 month", t0() + Duration::days(2)).await;
        let RecordOutcome::Recorded(answer) = recorder.record(42, "Bad", t0()).await.unwrap() else {
            panic!("expected Recorded");
        };
        let enrollment = store.current_enrollment(42).await.unwrap().unwrap();
        let occurrences = store.occurrences_for_enrollment(enrollment.id).await.unwrap();
        let answered = occurrences.iter().find(|o| o.id == answer.occurrence_id).unwrap();
        assert_eq!(answered.scheduled_at, t0() + Duration::days(2));
        assert!(recorder.has_pending(42).await.unwrap());
    }
}
