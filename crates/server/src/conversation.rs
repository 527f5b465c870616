//! Participant-facing exchange: registration, then answers.
//!
//! Session state lives in the store, so a restart mid-registration resumes
//! where the participant left off.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pulse_core::{Affordances, ParticipantId, SessionState};
use pulse_notify::{IncomingMessage, Notifier};
use pulse_scheduler::{AnswerRecorder, EnrollmentService, RecordOutcome, SchedulerError, TemplateCatalog};
use pulse_store::ScheduleStore;
use tracing::{debug, info};

const PROMPT_NAME: &str = "Hello! Please enter your name:";
const PROMPT_TRACK: &str = "Please select a package:";
const INVALID_TRACK: &str = "Invalid selection. Please choose a package:";
const ANSWER_SAVED: &str = "Your answer has been saved!";
const INVALID_ANSWER: &str = "Invalid answer. Please choose one of the following options:";
const NOTHING_PENDING: &str = "You don't have any questions to answer right now.";
const HELP: &str = "Available commands:\n/start - register and choose a package\n/help - show this message";

pub struct Conversation {
    store: Arc<dyn ScheduleStore>,
    catalog: Arc<TemplateCatalog>,
    enrollments: EnrollmentService,
    recorder: AnswerRecorder,
    notifier: Arc<dyn Notifier>,
}

impl Conversation {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        catalog: Arc<TemplateCatalog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            enrollments: EnrollmentService::new(store.clone(), catalog.clone()),
            recorder: AnswerRecorder::new(store.clone(), catalog.clone()),
            store,
            catalog,
            notifier,
        }
    }

    pub async fn handle(
        &self,
        message: &IncomingMessage,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let chat = message.chat_id;
        match message.text.trim() {
            "/start" => return self.start(chat, now).await,
            "/help" => return self.reply(chat, HELP, Affordances::None).await,
            _ => {}
        }

        match self.store.load_session(chat).await? {
            Some(SessionState::AwaitingName) => self.on_name(message, now).await,
            Some(SessionState::AwaitingTrack { name }) => {
                self.on_track(chat, &name, message.text.trim(), now).await
            }
            Some(SessionState::Answering) => self.on_answer(chat, &message.text, now).await,
            None => {
                if self.store.current_enrollment(chat).await?.is_some() {
                    self.on_answer(chat, &message.text, now).await
                } else {
                    self.start(chat, now).await
                }
            }
        }
    }

    async fn start(&self, chat: ParticipantId, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.store
            .save_session(chat, &SessionState::AwaitingName, now)
            .await?;
        self.reply(chat, PROMPT_NAME, Affordances::None).await
    }

    async fn on_name(
        &self,
        message: &IncomingMessage,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let chat = message.chat_id;
        let name = message.text.trim();
        if name.is_empty() {
            return self.reply(chat, PROMPT_NAME, Affordances::None).await;
        }

        self.store
            .upsert_participant(chat, message.username.as_deref(), name, now)
            .await?;
        self.store
            .save_session(
                chat,
                &SessionState::AwaitingTrack {
                    name: name.to_string(),
                },
                now,
            )
            .await?;
        self.reply(chat, PROMPT_TRACK, self.track_choices()).await
    }

    async fn on_track(
        &self,
        chat: ParticipantId,
        name: &str,
        selection: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let Some(track) = self.catalog.track_by_name(selection) else {
            debug!(participant_id = chat, selection, "unknown package selected");
            return self.reply(chat, INVALID_TRACK, self.track_choices()).await;
        };

        self.enrollments.enroll_in(chat, track, now).await?;
        self.store
            .save_session(chat, &SessionState::Answering, now)
            .await?;
        info!(participant_id = chat, track = %track.name, "registration complete");

        let greeting = format!("Hello, {name}!\nYou have registered for: {}", track.name);
        self.reply(chat, &greeting, Affordances::None).await
    }

    async fn on_answer(
        &self,
        chat: ParticipantId,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        match self.recorder.record(chat, raw, now).await? {
            RecordOutcome::Recorded(_) => self.reply(chat, ANSWER_SAVED, Affordances::None).await,
            RecordOutcome::Rejected { affordances, .. } => {
                self.reply(chat, INVALID_ANSWER, affordances).await
            }
            RecordOutcome::NothingPending => {
                self.reply(chat, NOTHING_PENDING, Affordances::None).await
            }
        }
    }

    fn track_choices(&self) -> Affordances {
        Affordances::Choices(self.catalog.track_names())
    }

    async fn reply(
        &self,
        chat: ParticipantId,
        text: &str,
        affordances: Affordances,
    ) -> Result<(), SchedulerError> {
        self.notifier.deliver(chat, text, &affordances).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_core::CatalogDocument;
    use pulse_notify::NotifyError;
    use pulse_scheduler::DeliveryScanner;
    use pulse_notify::MessageRenderer;
    use pulse_store::MemoryStore;
    use tokio::sync::Mutex;

    /// Notifier that keeps every reply.
    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(ParticipantId, String, Affordances)>>,
    }

    impl Outbox {
        async fn last(&self) -> (String, Affordances) {
            let sent = self.sent.lock().await;
            let (_, text, affordances) = sent.last().cloned().expect("no reply sent");
            (text, affordances)
        }
    }

    #[async_trait::async_trait]
    impl Notifier for Outbox {
        async fn deliver(
            &self,
            recipient: ParticipantId,
            text: &str,
            affordances: &Affordances,
        ) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .await
                .push((recipient, text.to_string(), affordances.clone()));
            Ok(())
        }

        fn channel_name(&self) -> &str {
            "outbox"
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    fn msg(text: &str) -> IncomingMessage {
        IncomingMessage {
            update_id: 1,
            chat_id: 77,
            username: Some("@aru".to_string()),
            text: text.to_string(),
        }
    }

    async fn setup() -> (Arc<MemoryStore>, Arc<TemplateCatalog>, Arc<Outbox>, Conversation) {
        let store = Arc::new(MemoryStore::new());
        store.seed_catalog(&CatalogDocument::builtin().unwrap()).await.unwrap();
        let catalog = Arc::new(TemplateCatalog::load(store.as_ref()).await.unwrap());
        let outbox = Arc::new(Outbox::default());
        let conversation = Conversation::new(store.clone(), catalog.clone(), outbox.clone());
        (store, catalog, outbox, conversation)
    }

    #[tokio::test]
    async fn registration_flow_enrolls_participant() {
        let (store, _, outbox, conv) = setup().await;

        conv.handle(&msg("/start"), t0()).await.unwrap();
        assert_eq!(outbox.last().await.0, PROMPT_NAME);

        conv.handle(&msg("Aru"), t0()).await.unwrap();
        let (text, affordances) = outbox.last().await;
        assert_eq!(text, PROMPT_TRACK);
        assert_eq!(affordances.labels(), vec!["1 month", "2 months", "3 months"]);

        conv.handle(&msg("2 months"), t0()).await.unwrap();
        assert_eq!(
            outbox.last().await.0,
            "Hello, Aru!\nYou have registered for: 2 months"
        );
        assert_eq!(store.load_session(77).await.unwrap(), Some(SessionState::Answering));
        assert!(store.current_enrollment(77).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalid_package_reprompts_without_enrolling() {
        let (store, _, outbox, conv) = setup().await;
        conv.handle(&msg("/start"), t0()).await.unwrap();
        conv.handle(&msg("Aru"), t0()).await.unwrap();

        conv.handle(&msg("6 months"), t0()).await.unwrap();
        let (text, affordances) = outbox.last().await;
        assert_eq!(text, INVALID_TRACK);
        assert_eq!(affordances.labels().len(), 3);
        assert!(store.current_enrollment(77).await.unwrap().is_none());
        assert_eq!(
            store.load_session(77).await.unwrap(),
            Some(SessionState::AwaitingTrack { name: "Aru".to_string() })
        );
    }

    #[tokio::test]
    async fn unknown_sender_is_greeted() {
        let (store, _, outbox, conv) = setup().await;
        conv.handle(&msg("hello?"), t0()).await.unwrap();
        assert_eq!(outbox.last().await.0, PROMPT_NAME);
        assert_eq!(store.load_session(77).await.unwrap(), Some(SessionState::AwaitingName));
    }

    #[tokio::test]
    async fn answers_go_through_recorder() {
        let (store, catalog, outbox, conv) = setup().await;
        conv.handle(&msg("/start"), t0()).await.unwrap();
        conv.handle(&msg("Aru"), t0()).await.unwrap();
        conv.handle(&msg("1 month"), t0()).await.unwrap();

        conv.handle(&msg("Good"), t0()).await.unwrap();
        assert_eq!(outbox.last().await.0, NOTHING_PENDING);

        DeliveryScanner::new(store.clone(), catalog, outbox.clone(), MessageRenderer::default())
            .run_at(t0())
            .await
            .unwrap();

        conv.handle(&msg("Great"), t0()).await.unwrap();
        let (text, affordances) = outbox.last().await;
        assert_eq!(text, INVALID_ANSWER);
        assert!(affordances.accepts("Very good"));

        conv.handle(&msg("Very good"), t0()).await.unwrap();
        assert_eq!(outbox.last().await.0, ANSWER_SAVED);
    }

    #[tokio::test]
    async fn session_survives_restart() {
        let (store, catalog, _, conv) = setup().await;
        conv.handle(&msg("/start"), t0()).await.unwrap();
        conv.handle(&msg("Aru"), t0()).await.unwrap();
        drop(conv);

        let outbox = Arc::new(Outbox::default());
        let restarted = Conversation::new(store.clone(), catalog, outbox.clone());
        restarted.handle(&msg("3 months"), t0()).await.unwrap();
        assert_eq!(
            outbox.last().await.0,
            "Hello, Aru!\nYou have registered for: 3 months"
        );
    }

    #[tokio::test]
    async fn help_lists_commands() {
        let (_, _, outbox, conv) = setup().await;
        conv.handle(&msg("/help"), t0()).await.unwrap();
        assert!(outbox.last().await.0.contains("/start"));
    }
}
