//! Notifier trait definition and shared error types.

use pulse_core::{Affordances, ParticipantId};

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Channel API error: {0}")]
    Api(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Delivery timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Trait for notification channel implementations.
///
/// A successful return means the channel accepted the message; any error is
/// treated by callers as a transient failure to be retried later.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Send `text` to `recipient`, presenting `affordances` as reply options.
    async fn deliver(
        &self,
        recipient: ParticipantId,
        text: &str,
        affordances: &Affordances,
    ) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "telegram", "console").
    fn channel_name(&self) -> &str;
}
