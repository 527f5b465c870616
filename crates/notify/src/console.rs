//! Dry-run channel that writes messages to the log instead of sending them.

use pulse_core::{Affordances, ParticipantId};

use crate::traits::{Notifier, NotifyError};

/// Logs every delivery at `info` level and always succeeds.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Notifier for ConsoleNotifier {
    async fn deliver(
        &self,
        recipient: ParticipantId,
        text: &str,
        affordances: &Affordances,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            recipient,
            options = ?affordances.labels(),
            "[console] {}",
            text
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "console"
    }
}
