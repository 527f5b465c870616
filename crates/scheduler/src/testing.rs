//! Fixtures shared by the unit tests of this crate.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pulse_core::{Affordances, CatalogDocument, ParticipantId, TemplateId};
use pulse_notify::{Notifier, NotifyError};
use pulse_store::{MemoryStore, ScheduleStore};
use tokio::sync::Mutex;

use crate::catalog::TemplateCatalog;
use crate::enrollment::EnrollmentService;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Memory store seeded with the built-in catalog.
pub async fn seeded() -> (Arc<MemoryStore>, Arc<TemplateCatalog>) {
    let store = Arc::new(MemoryStore::new());
    store.seed_catalog(&CatalogDocument::builtin().unwrap()).await.unwrap();
    let catalog = Arc::new(TemplateCatalog::load(store.as_ref()).await.unwrap());
    (store, catalog)
}

/// Participant 42 enrolled into `track` at [`t0`].
pub async fn enroll(track: &str) -> (Arc<MemoryStore>, Arc<TemplateCatalog>) {
    let (store, catalog) = seeded().await;
    store.upsert_participant(42, None, "Aru", t0()).await.unwrap();
    EnrollmentService::new(store.clone(), catalog.clone())
        .enroll(42, track, t0())
        .await
        .unwrap();
    (store, catalog)
}

/// The store's catalog with one template dropped, as after a bad catalog edit.
pub async fn catalog_without(store: &MemoryStore, template: TemplateId) -> Arc<TemplateCatalog> {
    let mut stored = store.load_catalog().await.unwrap();
    stored.templates.retain(|t| t.id != template);
    Arc::new(TemplateCatalog::from_stored(stored))
}

/// Id of the first template of `track`.
pub fn first_template(catalog: &TemplateCatalog, track: &str) -> TemplateId {
    let track = catalog.track_by_name(track).unwrap();
    catalog.templates_for_track(track.id)[0].id
}

/// Notifier that records accepted messages and can fail or stall on demand.
pub struct RecordingNotifier {
    pub calls: AtomicU32,
    pub sent: AtomicU32,
    fail_remaining: AtomicU32,
    stall_ms: AtomicU64,
    messages: Mutex<Vec<(ParticipantId, String, Affordances)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            sent: AtomicU32::new(0),
            fail_remaining: AtomicU32::new(0),
            stall_ms: AtomicU64::new(0),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn stall_for(&self, d: Duration) {
        self.stall_ms.store(d.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn messages(&self) -> Vec<(ParticipantId, String, Affordances)> {
        self.messages.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(
        &self,
        recipient: ParticipantId,
        text: &str,
        affordances: &Affordances,
    ) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stall = self.stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            tokio::time::sleep(Duration::from_millis(stall)).await;
        }
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(NotifyError::Api("simulated outage".to_string()));
        }
        self.messages
            .lock()
            .await
            .push((recipient, text.to_string(), affordances.clone()));
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}
