//! PostgreSQL backend.
//!
//! Every multi-row write runs in one transaction. The delivery claim is a
//! conditional `UPDATE ... WHERE delivered = FALSE` whose affected-row count
//! decides the winner, and answer uniqueness is a table constraint. Claims
//! stay `in_flight` until the scanner confirms or releases them.

use chrono::{DateTime, Utc};
use pulse_core::config::PostgresConfig;
use pulse_core::{
    Answer, AnswerKind, CatalogDocument, DueOccurrence, Enrollment, EnrollmentId, NewEnrollment,
    Occurrence, OccurrenceId, Participant, ParticipantId, PlannedOccurrence, QuestionTemplate,
    SessionState, Track,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{error, info};

use crate::error::StoreError;
use crate::traits::{ScheduleStore, StoredCatalog};

// ── Row types ────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct TemplateRow {
    id: i64,
    track_id: i64,
    text: String,
    answer_kind: String,
    choices: Option<Json<Vec<String>>>,
    interval_days: i32,
    delay_days: i32,
}

impl TryFrom<TemplateRow> for QuestionTemplate {
    type Error = StoreError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        let kind: AnswerKind = row
            .answer_kind
            .parse()
            .map_err(|e: String| StoreError::Corrupt(format!("question_templates.{}: {e}", row.id)))?;
        Ok(Self {
            id: row.id,
            track_id: row.track_id,
            text: row.text,
            kind,
            choices: row.choices.map(|Json(c)| c),
            interval_days: row.interval_days,
            delay_days: row.delay_days,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DueRow {
    occurrence_id: i64,
    enrollment_id: i64,
    template_id: i64,
    participant_id: i64,
    scheduled_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl From<DueRow> for DueOccurrence {
    fn from(row: DueRow) -> Self {
        Self {
            occurrence_id: row.occurrence_id,
            enrollment_id: row.enrollment_id,
            template_id: row.template_id,
            participant_id: row.participant_id,
            scheduled_at: row.scheduled_at,
            delivered_at: row.delivered_at,
        }
    }
}

const DUE_COLUMNS: &str = "o.id AS occurrence_id, o.enrollment_id, o.template_id,
                           e.participant_id, o.scheduled_at, o.delivered_at";

// ── Store ────────────────────────────────────────────────────────────

/// PostgreSQL-backed [`ScheduleStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a connection pool and apply pending migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!("PostgreSQL connected: {}", config.host);

        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("Database migrations applied successfully");

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl ScheduleStore for PgStore {
    async fn seed_catalog(&self, catalog: &CatalogDocument) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for track in &catalog.tracks {
            sqlx::query(
                "INSERT INTO tracks (name, duration_days) VALUES ($1, $2)
                 ON CONFLICT (name) DO NOTHING",
            )
            .bind(&track.name)
            .bind(track.duration_days)
            .execute(&mut *tx)
            .await?;

            let track_id: i64 = sqlx::query_scalar("SELECT id FROM tracks WHERE name = $1")
                .bind(&track.name)
                .fetch_one(&mut *tx)
                .await?;

            for q in &track.questions {
                sqlx::query(
                    "INSERT INTO question_templates
                        (track_id, text, answer_kind, choices, interval_days, delay_days)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (track_id, text) DO NOTHING",
                )
                .bind(track_id)
                .bind(&q.text)
                .bind(q.kind.as_str())
                .bind(q.choices.clone().map(Json))
                .bind(q.interval_days)
                .bind(q.delay_days)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_catalog(&self) -> Result<StoredCatalog, StoreError> {
        let tracks = sqlx::query_as::<_, (i64, String, i32)>(
            "SELECT id, name, duration_days FROM tracks ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(id, name, duration_days)| Track {
            id,
            name,
            duration_days,
        })
        .collect();

        let templates = sqlx::query_as::<_, TemplateRow>(
            "SELECT id, track_id, text, answer_kind, choices, interval_days, delay_days
             FROM question_templates ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(QuestionTemplate::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(StoredCatalog { tracks, templates })
    }

    async fn upsert_participant(
        &self,
        id: ParticipantId,
        username: Option<&str>,
        full_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Participant, StoreError> {
        let (id, username, full_name, created_at) =
            sqlx::query_as::<_, (i64, Option<String>, String, DateTime<Utc>)>(
                "INSERT INTO participants (id, username, full_name, created_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (id) DO UPDATE SET
                    full_name = EXCLUDED.full_name,
                    username = EXCLUDED.username
                 RETURNING id, username, full_name, created_at",
            )
            .bind(id)
            .bind(username)
            .bind(full_name)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(Participant {
            id,
            username,
            full_name,
            created_at,
        })
    }

    async fn create_enrollment(
        &self,
        enrollment: &NewEnrollment,
        plan: &[PlannedOccurrence],
    ) -> Result<Enrollment, StoreError> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO enrollments (participant_id, track_id, started_at)
             VALUES ($1, $2, $3)
             RETURNING id",
        )
        .bind(enrollment.participant_id)
        .bind(enrollment.track_id)
        .bind(enrollment.started_at)
        .fetch_one(&mut *tx)
        .await?;

        for planned in plan {
            sqlx::query(
                "INSERT INTO occurrences (enrollment_id, template_id, scheduled_at)
                 VALUES ($1, $2, $3)",
            )
            .bind(id)
            .bind(planned.template_id)
            .bind(planned.scheduled_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Enrollment {
            id,
            participant_id: enrollment.participant_id,
            track_id: enrollment.track_id,
            started_at: enrollment.started_at,
        })
    }

    async fn current_enrollment(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query_as::<_, (i64, i64, i64, DateTime<Utc>)>(
            "SELECT id, participant_id, track_id, started_at
             FROM enrollments
             WHERE participant_id = $1
             ORDER BY started_at DESC, id DESC
             LIMIT 1",
        )
        .bind(participant)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, participant_id, track_id, started_at)| Enrollment {
            id,
            participant_id,
            track_id,
            started_at,
        }))
    }

    async fn occurrences_for_enrollment(
        &self,
        enrollment: EnrollmentId,
    ) -> Result<Vec<Occurrence>, StoreError> {
        type OccurrenceRow = (
            i64,
            i64,
            i64,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
        );
        let rows = sqlx::query_as::<_, OccurrenceRow>(
            "SELECT id, enrollment_id, template_id, scheduled_at, delivered_at, held_at
             FROM occurrences
             WHERE enrollment_id = $1
             ORDER BY scheduled_at, id",
        )
        .bind(enrollment)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, enrollment_id, template_id, scheduled_at, delivered_at, held_at)| {
                    Occurrence {
                        id,
                        enrollment_id,
                        template_id,
                        scheduled_at,
                        delivered_at,
                        held_at,
                    }
                },
            )
            .collect())
    }

    async fn due_occurrences(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DueOccurrence>, StoreError> {
        let sql = format!(
            "SELECT {DUE_COLUMNS}
             FROM occurrences o
             JOIN enrollments e ON e.id = o.enrollment_id
             WHERE o.delivered = FALSE
               AND o.held_at IS NULL
               AND o.scheduled_at <= $1
             ORDER BY o.scheduled_at, o.id
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, DueRow>(&sql)
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(DueOccurrence::from).collect())
    }

    async fn claim_occurrence(
        &self,
        id: OccurrenceId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE occurrences
             SET delivered = TRUE, in_flight = TRUE, delivered_at = GREATEST($2, scheduled_at)
             WHERE id = $1 AND delivered = FALSE AND held_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn confirm_delivery(&self, id: OccurrenceId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE occurrences SET in_flight = FALSE WHERE id = $1 AND in_flight = TRUE",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_claim(&self, id: OccurrenceId) -> Result<bool, StoreError> {
        // In-flight occurrences cannot carry an answer, so no answer check.
        let result = sqlx::query(
            "UPDATE occurrences
             SET delivered = FALSE, in_flight = FALSE, delivered_at = NULL
             WHERE id = $1 AND in_flight = TRUE",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn settle_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE occurrences SET in_flight = FALSE
             WHERE in_flight = TRUE AND delivered_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn hold_occurrence(
        &self,
        id: OccurrenceId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE occurrences SET held_at = $2
             WHERE id = $1 AND delivered = FALSE AND held_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reminder_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DueOccurrence>, StoreError> {
        let sql = format!(
            "SELECT {DUE_COLUMNS}
             FROM occurrences o
             JOIN enrollments e ON e.id = o.enrollment_id
             WHERE o.delivered = TRUE
               AND o.in_flight = FALSE
               AND o.delivered_at < $1
               AND NOT EXISTS (SELECT 1 FROM answers a WHERE a.occurrence_id = o.id)
             ORDER BY o.delivered_at, o.id"
        );
        let rows = sqlx::query_as::<_, DueRow>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(DueOccurrence::from).collect())
    }

    async fn latest_pending(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<DueOccurrence>, StoreError> {
        let sql = format!(
            "SELECT {DUE_COLUMNS}
             FROM occurrences o
             JOIN enrollments e ON e.id = o.enrollment_id
             WHERE e.id = (
                    SELECT id FROM enrollments
                    WHERE participant_id = $1
                    ORDER BY started_at DESC, id DESC
                    LIMIT 1
                 )
               AND o.delivered = TRUE
               AND o.in_flight = FALSE
               AND NOT EXISTS (SELECT 1 FROM answers a WHERE a.occurrence_id = o.id)
             ORDER BY o.scheduled_at DESC, o.id DESC
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, DueRow>(&sql)
            .bind(participant)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(DueOccurrence::from))
    }

    async fn insert_answer(
        &self,
        occurrence: OccurrenceId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Answer, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Holding the row lock keeps a concurrent claim or release from
        // changing the delivery state while the answer is written.
        let answerable: Option<bool> = sqlx::query_scalar(
            "SELECT delivered AND NOT in_flight FROM occurrences WHERE id = $1 FOR SHARE",
        )
        .bind(occurrence)
        .fetch_optional(&mut *tx)
        .await?;

        match answerable {
            None => {
                return Err(StoreError::NotFound {
                    entity: "occurrence",
                    id: occurrence,
                })
            }
            Some(false) => return Err(StoreError::NotDelivered(occurrence)),
            Some(true) => {}
        }

        let result = sqlx::query_as::<_, (i64, i64, String, DateTime<Utc>)>(
            "INSERT INTO answers (occurrence_id, text, answered_at)
             VALUES ($1, $2, $3)
             RETURNING id, occurrence_id, text, answered_at",
        )
        .bind(occurrence)
        .bind(text)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let (id, occurrence_id, text, answered_at) = match result {
            Ok(row) => row,
            Err(e) => return Err(map_unique_violation(e, occurrence)),
        };

        tx.commit().await?;

        Ok(Answer {
            id,
            occurrence_id,
            text,
            answered_at,
        })
    }

    async fn answer_for(&self, occurrence: OccurrenceId) -> Result<Option<Answer>, StoreError> {
        let row = sqlx::query_as::<_, (i64, i64, String, DateTime<Utc>)>(
            "SELECT id, occurrence_id, text, answered_at FROM answers WHERE occurrence_id = $1",
        )
        .bind(occurrence)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, occurrence_id, text, answered_at)| Answer {
            id,
            occurrence_id,
            text,
            answered_at,
        }))
    }

    async fn load_session(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<SessionState>, StoreError> {
        let row: Option<Json<SessionState>> = sqlx::query_scalar(
            "SELECT state FROM conversation_sessions WHERE participant_id = $1",
        )
        .bind(participant)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|Json(state)| state))
    }

    async fn save_session(
        &self,
        participant: ParticipantId,
        state: &SessionState,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversation_sessions (participant_id, state, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (participant_id) DO UPDATE SET
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(participant)
        .bind(Json(state))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_session(&self, participant: ParticipantId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM conversation_sessions WHERE participant_id = $1")
            .bind(participant)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Map a PostgreSQL unique violation (23505) on `answers` to `AnswerExists`.
fn map_unique_violation(e: sqlx::Error, occurrence: OccurrenceId) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::AnswerExists(occurrence);
        }
    }
    error!("answer insert database error: {}", e);
    StoreError::Database(e)
}
