//! In-process [`ScheduleStore`] used by tests and `--store memory` runs.
//!
//! All state sits behind one async mutex, so every operation is atomic with
//! respect to every other one. That gives the same observable claim and
//! answer-uniqueness behaviour as the PostgreSQL backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use pulse_core::{
    Answer, CatalogDocument, DueOccurrence, Enrollment, EnrollmentId, NewEnrollment, Occurrence,
    OccurrenceId, Participant, ParticipantId, PlannedOccurrence, QuestionTemplate, SessionState,
    Track,
};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::traits::{ScheduleStore, StoredCatalog};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    participants: HashMap<ParticipantId, Participant>,
    tracks: Vec<Track>,
    templates: Vec<QuestionTemplate>,
    enrollments: BTreeMap<EnrollmentId, Enrollment>,
    occurrences: BTreeMap<OccurrenceId, Occurrence>,
    in_flight: HashSet<OccurrenceId>,
    answers: HashMap<OccurrenceId, Answer>,
    sessions: HashMap<ParticipantId, SessionState>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn current_enrollment(&self, participant: ParticipantId) -> Option<&Enrollment> {
        self.enrollments
            .values()
            .filter(|e| e.participant_id == participant)
            .max_by_key(|e| (e.started_at, e.id))
    }

    /// Delivered, confirmed and not yet answered.
    fn pending(&self, occurrence: &Occurrence) -> bool {
        occurrence.is_delivered()
            && !self.in_flight.contains(&occurrence.id)
            && !self.answers.contains_key(&occurrence.id)
    }

    fn due(&self, occurrence: &Occurrence) -> Option<DueOccurrence> {
        let enrollment = self.enrollments.get(&occurrence.enrollment_id)?;
        Some(DueOccurrence {
            occurrence_id: occurrence.id,
            enrollment_id: occurrence.enrollment_id,
            template_id: occurrence.template_id,
            participant_id: enrollment.participant_id,
            scheduled_at: occurrence.scheduled_at,
            delivered_at: occurrence.delivered_at,
        })
    }
}

/// Mutex-guarded in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScheduleStore for MemoryStore {
    async fn seed_catalog(&self, catalog: &CatalogDocument) -> Result<(), StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;

        for track in &catalog.tracks {
            let existing = inner
                .tracks
                .iter()
                .find(|t| t.name == track.name)
                .map(|t| t.id);
            let track_id = match existing {
                Some(id) => id,
                None => {
                    let id = inner.next_id();
                    inner.tracks.push(Track {
                        id,
                        name: track.name.clone(),
                        duration_days: track.duration_days,
                    });
                    id
                }
            };

            for q in &track.questions {
                let exists = inner
                    .templates
                    .iter()
                    .any(|t| t.track_id == track_id && t.text == q.text);
                if !exists {
                    let id = inner.next_id();
                    inner.templates.push(q.to_template(id, track_id));
                }
            }
        }
        Ok(())
    }

    async fn load_catalog(&self) -> Result<StoredCatalog, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(StoredCatalog {
            tracks: inner.tracks.clone(),
            templates: inner.templates.clone(),
        })
    }

    async fn upsert_participant(
        &self,
        id: ParticipantId,
        username: Option<&str>,
        full_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Participant, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let participant = inner
            .participants
            .entry(id)
            .and_modify(|p| {
                p.full_name = full_name.to_string();
                p.username = username.map(str::to_string);
            })
            .or_insert_with(|| Participant {
                id,
                username: username.map(str::to_string),
                full_name: full_name.to_string(),
                created_at: now,
            });
        Ok(participant.clone())
    }

    async fn create_enrollment(
        &self,
        enrollment: &NewEnrollment,
        plan: &[PlannedOccurrence],
    ) -> Result<Enrollment, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;

        if !inner.participants.contains_key(&enrollment.participant_id) {
            return Err(StoreError::NotFound {
                entity: "participant",
                id: enrollment.participant_id,
            });
        }
        if !inner.tracks.iter().any(|t| t.id == enrollment.track_id) {
            return Err(StoreError::NotFound {
                entity: "track",
                id: enrollment.track_id,
            });
        }
        // Validate the whole plan before writing anything.
        if let Some(missing) = plan
            .iter()
            .find(|p| !inner.templates.iter().any(|t| t.id == p.template_id))
        {
            return Err(StoreError::NotFound {
                entity: "question template",
                id: missing.template_id,
            });
        }

        let id = inner.next_id();
        let created = Enrollment {
            id,
            participant_id: enrollment.participant_id,
            track_id: enrollment.track_id,
            started_at: enrollment.started_at,
        };
        inner.enrollments.insert(id, created.clone());

        for planned in plan {
            let occurrence_id = inner.next_id();
            inner.occurrences.insert(
                occurrence_id,
                Occurrence {
                    id: occurrence_id,
                    enrollment_id: id,
                    template_id: planned.template_id,
                    scheduled_at: planned.scheduled_at,
                    delivered_at: None,
                    held_at: None,
                },
            );
        }
        Ok(created)
    }

    async fn current_enrollment(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<Enrollment>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner.current_enrollment(participant).cloned())
    }

    async fn occurrences_for_enrollment(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<Vec<Occurrence>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let mut found: Vec<Occurrence> = inner
            .occurrences
            .values()
            .filter(|o| o.enrollment_id == enrollment)
            .cloned()
            .collect();
        found.sort_by_key(|o| (o.scheduled_at, o.id));
        Ok(found)
    }

    async fn due_occurrences(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DueOccurrence>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let mut due: Vec<DueOccurrence> = inner
            .occurrences
            .values()
            .filter(|o| !o.is_delivered() && o.held_at.is_none() && o.scheduled_at <= now)
            .filter_map(|o| inner.due(o))
            .collect();
        due.sort_by_key(|d| (d.scheduled_at, d.occurrence_id));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn claim_occurrence(
        &self,
        id: OccurrenceId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        match inner.occurrences.get_mut(&id) {
            Some(o) if !o.is_delivered() && o.held_at.is_none() => {
                o.delivered_at = Some(now.max(o.scheduled_at));
                inner.in_flight.insert(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn confirm_delivery(&self, id: OccurrenceId) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        Ok(inner.in_flight.remove(&id))
    }

    async fn release_claim(&self, id: OccurrenceId) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        if !inner.in_flight.remove(&id) {
            return Ok(false);
        }
        if let Some(o) = inner.occurrences.get_mut(&id) {
            o.delivered_at = None;
        }
        Ok(true)
    }

    async fn settle_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let Inner {
            in_flight,
            occurrences,
            ..
        } = &mut *inner;
        let before = in_flight.len();
        in_flight.retain(|id| {
            occurrences
                .get(id)
                .and_then(|o| o.delivered_at)
                .is_some_and(|at| at >= cutoff)
        });
        Ok((before - in_flight.len()) as u64)
    }

    async fn hold_occurrence(
        &self,
        id: OccurrenceId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        match inner.occurrences.get_mut(&id) {
            Some(o) if !o.is_delivered() && o.held_at.is_none() => {
                o.held_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reminder_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DueOccurrence>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let mut candidates: Vec<DueOccurrence> = inner
            .occurrences
            .values()
            .filter(|o| matches!(o.delivered_at, Some(at) if at < cutoff))
            .filter(|o| inner.pending(o))
            .filter_map(|o| inner.due(o))
            .collect();
        candidates.sort_by_key(|d| (d.delivered_at, d.occurrence_id));
        Ok(candidates)
    }

    async fn latest_pending(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<DueOccurrence>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let Some(enrollment) = inner.current_enrollment(participant) else {
            return Ok(None);
        };
        let latest = inner
            .occurrences
            .values()
            .filter(|o| o.enrollment_id == enrollment.id)
            .filter(|o| inner.pending(o))
            .max_by_key(|o| (o.scheduled_at, o.id));
        Ok(latest.and_then(|o| inner.due(o)))
    }

    async fn insert_answer(
        &self,
        occurrence: OccurrenceId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Answer, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;

        match inner.occurrences.get(&occurrence) {
            None => {
                return Err(StoreError::NotFound {
                    entity: "occurrence",
                    id: occurrence,
                })
            }
            Some(o) if !o.is_delivered() || inner.in_flight.contains(&occurrence) => {
                return Err(StoreError::NotDelivered(occurrence))
            }
            Some(_) => {}
        }
        if inner.answers.contains_key(&occurrence) {
            return Err(StoreError::AnswerExists(occurrence));
        }

        let answer = Answer {
            id: inner.next_id(),
            occurrence_id: occurrence,
            text: text.to_string(),
            answered_at: now,
        };
        inner.answers.insert(occurrence, answer.clone());
        Ok(answer)
    }

    async fn answer_for(&self, occurrence: OccurrenceId) -> Result<Option<Answer>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner.answers.get(&occurrence).cloned())
    }

    async fn load_session(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<SessionState>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(&participant).cloned())
    }

    async fn save_session(
        &self,
        participant: ParticipantId,
        state: &SessionState,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(participant, state.clone());
        Ok(())
    }

    async fn clear_session(&self, participant: ParticipantId) -> Result<(), StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(&participant);
        Ok(())
    }
}
