//! Inbound loop: long-poll Telegram and hand each message to the
//! conversation until shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pulse_notify::UpdatePoller;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::conversation::Conversation;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub async fn run(mut poller: UpdatePoller, conversation: Arc<Conversation>, shutdown: Arc<Notify>) {
    info!("update polling started");

    let notified = shutdown.notified();
    tokio::pin!(notified);
    notified.as_mut().enable();

    loop {
        // An interrupted poll has not advanced the offset, so nothing is lost.
        let batch = tokio::select! {
            biased;
            _ = &mut notified => break,
            batch = poller.poll() => batch,
        };

        match batch {
            Ok(messages) => {
                for message in &messages {
                    if let Err(e) = conversation.handle(message, Utc::now()).await {
                        warn!(
                            participant_id = message.chat_id,
                            update_id = message.update_id,
                            error = %e,
                            "failed to handle message"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, backoff = ?ERROR_BACKOFF, "getUpdates failed");
                tokio::select! {
                    _ = &mut notified => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }

    info!(offset = ?poller.offset(), "update polling stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{Affordances, CatalogDocument, ParticipantId};
    use pulse_notify::{Notifier, NotifyError};
    use pulse_scheduler::TemplateCatalog;
    use pulse_store::{MemoryStore, ScheduleStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingNotifier {
        sent: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Notifier for CountingNotifier {
        async fn deliver(
            &self,
            _recipient: ParticipantId,
            _text: &str,
            _affordances: &Affordances,
        ) -> Result<(), NotifyError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn channel_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn forwards_messages_and_stops_on_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottok/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [ { "update_id": 1, "message": { "chat": { "id": 9 }, "text": "/start" } } ],
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bottok/getUpdates"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": true, "result": [] }))
                    .set_delay(Duration::from_millis(20)),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.seed_catalog(&CatalogDocument::builtin().unwrap()).await.unwrap();
        let catalog = Arc::new(TemplateCatalog::load(store.as_ref()).await.unwrap());
        let notifier = Arc::new(CountingNotifier {
            sent: AtomicU32::new(0),
        });
        let conversation = Arc::new(Conversation::new(store.clone(), catalog, notifier.clone()));
        let poller =
            UpdatePoller::from_config("tok".to_string(), server.uri(), Duration::from_secs(0)).unwrap();

        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run(poller, conversation, shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.notify_waiters();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("polling should stop within timeout")
            .expect("polling task should not panic");

        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
        assert!(store.load_session(9).await.unwrap().is_some());
    }
}
