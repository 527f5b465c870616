use std::sync::Arc;

use chrono::{DateTime, Utc};
use pulse_core::{Enrollment, NewEnrollment, ParticipantId, Track};
use pulse_store::ScheduleStore;
use tracing::info;

use crate::catalog::TemplateCatalog;
use crate::error::SchedulerError;
use crate::generator;

/// Registers participants into tracks and materializes their schedule.
pub struct EnrollmentService {
    store: Arc<dyn ScheduleStore>,
    catalog: Arc<TemplateCatalog>,
}

impl EnrollmentService {
    pub fn new(store: Arc<dyn ScheduleStore>, catalog: Arc<TemplateCatalog>) -> Self {
        Self { store, catalog }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Enroll by track name, as chosen in the conversation.
    pub async fn enroll(
        &self,
        participant: ParticipantId,
        track_name: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Enrollment, SchedulerError> {
        let track = self
            .catalog
            .track_by_name(track_name)
            .ok_or_else(|| SchedulerError::UnknownTrack(track_name.to_string()))?;
        self.enroll_in(participant, track, started_at).await
    }

    /// Create the enrollment and every occurrence of every template of the
    /// track in a single store transaction.
    pub async fn enroll_in(
        &self,
        participant: ParticipantId,
        track: &Track,
        started_at: DateTime<Utc>,
    ) -> Result<Enrollment, SchedulerError> {
        let templates = self.catalog.templates_for_track(track.id);
        let plan = generator::plan(started_at, track, templates);

        let enrollment = self
            .store
            .create_enrollment(
                &NewEnrollment {
                    participant_id: participant,
                    track_id: track.id,
                    started_at,
                },
                &plan,
            )
            .await?;

        info!(
            participant_id = participant,
            enrollment_id = enrollment.id,
            track = %track.name,
            occurrences = plan.len(),
            "participant enrolled"
        );
        Ok(enrollment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seeded, t0};
    use chrono::Duration;

    #[tokio::test]
    async fn enrollment_materializes_full_schedule() {
        let (store, catalog) = seeded().await;
        let service = EnrollmentService::new(store.clone(), catalog);
        store.upsert_participant(5, None, "Aru", t0()).await.unwrap();

        let enrollment = service.enroll(5, "1 month", t0()).await.unwrap();
        let occurrences = store.occurrences_for_enrollment(enrollment.id).await.unwrap();

        // Daily question: days 0..=30; medication question: days 10, 20, 30.
        assert_eq!(occurrences.len(), 31 + 3);
        assert!(occurrences.iter().all(|o| !o.is_delivered()));
        assert!(occurrences
            .iter()
            .all(|o| o.scheduled_at <= t0() + Duration::days(30)));
    }

    #[tokio::test]
    async fn unknown_track_is_rejected_without_writes() {
        let (store, catalog) = seeded().await;
        let service = EnrollmentService::new(store.clone(), catalog);
        store.upsert_participant(5, None, "Aru", t0()).await.unwrap();

        let err = service.enroll(5, "6 months", t0()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownTrack(ref n) if n == "6 months"));
        assert!(store.current_enrollment(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn re_enrollment_becomes_current() {
        let (store, catalog) = seeded().await;
        let service = EnrollmentService::new(store.clone(), catalog);
        store.upsert_participant(5, None, "Aru", t0()).await.unwrap();

        service.enroll(5, "1 month", t0()).await.unwrap();
        let second = service
            .enroll(5, "3 months", t0() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(store.current_enrollment(5).await.unwrap(), Some(second));
    }
}
