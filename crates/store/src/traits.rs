//! The store contract shared by every backend.

use chrono::{DateTime, Utc};
use pulse_core::{
    Answer, CatalogDocument, DueOccurrence, Enrollment, EnrollmentId, NewEnrollment, Occurrence,
    OccurrenceId, Participant, ParticipantId, PlannedOccurrence, QuestionTemplate, SessionState,
    Track,
};

use crate::error::StoreError;

/// Reference data as persisted, before validation by the scheduler catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCatalog {
    pub tracks: Vec<Track>,
    pub templates: Vec<QuestionTemplate>,
}

/// Transactional access to participants, enrollments, occurrences, answers
/// and conversation sessions.
#[async_trait::async_trait]
pub trait ScheduleStore: Send + Sync {
    // ── Reference data ──────────────────────────────────────────

    /// Insert tracks and templates that are not present yet. Idempotent.
    async fn seed_catalog(&self, catalog: &CatalogDocument) -> Result<(), StoreError>;

    async fn load_catalog(&self) -> Result<StoredCatalog, StoreError>;

    // ── Participants & enrollments ──────────────────────────────

    async fn upsert_participant(
        &self,
        id: ParticipantId,
        username: Option<&str>,
        full_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Participant, StoreError>;

    /// Create the enrollment and all of its occurrences in one transaction.
    ///
    /// Either every planned occurrence becomes visible together with the
    /// enrollment, or nothing is written.
    async fn create_enrollment(
        &self,
        enrollment: &NewEnrollment,
        plan: &[PlannedOccurrence],
    ) -> Result<Enrollment, StoreError>;

    /// The participant's enrollment with the latest start.
    async fn current_enrollment(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<Enrollment>, StoreError>;

    /// All occurrences of one enrollment, ordered by scheduled time.
    async fn occurrences_for_enrollment(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<Vec<Occurrence>, StoreError>;

    // ── Delivery ────────────────────────────────────────────────

    /// Undelivered, unheld occurrences with `scheduled_at <= now`, oldest first.
    async fn due_occurrences(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DueOccurrence>, StoreError>;

    /// Conditionally mark an occurrence delivered and in flight.
    ///
    /// An in-flight occurrence is neither answerable nor remindable until
    /// [`confirm_delivery`](Self::confirm_delivery) runs.
    ///
    /// Returns `true` only for the single caller whose update flipped the
    /// flag; every concurrent or later caller gets `false`.
    async fn claim_occurrence(
        &self,
        id: OccurrenceId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// End the in-flight phase after the channel accepted the message.
    async fn confirm_delivery(&self, id: OccurrenceId) -> Result<bool, StoreError>;

    /// Undo an in-flight claim after the channel rejected the delivery.
    ///
    /// Returns `false` when the claim is no longer in flight.
    async fn release_claim(&self, id: OccurrenceId) -> Result<bool, StoreError>;

    /// Confirm every claim still in flight that was taken before `cutoff`.
    ///
    /// Such a claim belongs to a tick that died mid-delivery; the message
    /// may or may not have gone out, and it is not sent again.
    async fn settle_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Take an undelivered occurrence out of the due set.
    ///
    /// Returns `false` if it was delivered or held already.
    async fn hold_occurrence(
        &self,
        id: OccurrenceId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    // ── Reminders & answers ─────────────────────────────────────

    /// Delivered, confirmed, unanswered occurrences with `delivered_at < cutoff`.
    async fn reminder_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DueOccurrence>, StoreError>;

    /// The latest-scheduled delivered, confirmed, unanswered occurrence of
    /// the participant's current enrollment.
    async fn latest_pending(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<DueOccurrence>, StoreError>;

    /// Persist an answer.
    ///
    /// Fails with [`StoreError::AnswerExists`] if the occurrence already has
    /// one and [`StoreError::NotDelivered`] if it was never delivered or is
    /// still in flight.
    async fn insert_answer(
        &self,
        occurrence: OccurrenceId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Answer, StoreError>;

    async fn answer_for(&self, occurrence: OccurrenceId) -> Result<Option<Answer>, StoreError>;

    // ── Conversation sessions ───────────────────────────────────

    async fn load_session(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<SessionState>, StoreError>;

    async fn save_session(
        &self,
        participant: ParticipantId,
        state: &SessionState,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn clear_session(&self, participant: ParticipantId) -> Result<(), StoreError>;
}
