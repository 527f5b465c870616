use pulse_core::OccurrenceId;
use thiserror::Error;

/// Errors produced by [`ScheduleStore`](crate::ScheduleStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("answer already recorded for occurrence {0}")]
    AnswerExists(OccurrenceId),

    #[error("occurrence {0} has not been delivered")]
    NotDelivered(OccurrenceId),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
