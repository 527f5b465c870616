//! Question Template Store: the validated, read-only view of tracks and
//! their question templates.
//!
//! Built once from what the store holds. Templates that fail validation are
//! dropped here with a warning, so the generator and the scanners only ever
//! see well-formed data.

use std::collections::HashMap;

use pulse_core::{QuestionTemplate, TemplateId, Track, TrackId};
use pulse_store::{ScheduleStore, StoreError, StoredCatalog};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    tracks: HashMap<TrackId, Track>,
    by_name: HashMap<String, TrackId>,
    templates: HashMap<TemplateId, QuestionTemplate>,
    /// Template ids per track, ascending.
    by_track: HashMap<TrackId, Vec<TemplateId>>,
}

impl TemplateCatalog {
    pub async fn load(store: &dyn ScheduleStore) -> Result<Self, StoreError> {
        let stored = store.load_catalog().await?;
        let catalog = Self::from_stored(stored);
        info!(
            tracks = catalog.tracks.len(),
            templates = catalog.templates.len(),
            "question catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_stored(stored: StoredCatalog) -> Self {
        let mut catalog = Self::default();

        for track in stored.tracks {
            if let Err(e) = track.validate() {
                warn!(track_id = track.id, error = %e, "rejecting invalid track");
                continue;
            }
            catalog.by_name.insert(track.name.clone(), track.id);
            catalog.tracks.insert(track.id, track);
        }

        for template in stored.templates {
            if !catalog.tracks.contains_key(&template.track_id) {
                warn!(
                    template_id = template.id,
                    track_id = template.track_id,
                    "rejecting template of unknown track"
                );
                continue;
            }
            if let Err(e) = template.validate() {
                warn!(template_id = template.id, error = %e, "rejecting invalid template");
                continue;
            }
            catalog
                .by_track
                .entry(template.track_id)
                .or_default()
                .push(template.id);
            catalog.templates.insert(template.id, template);
        }

        for ids in catalog.by_track.values_mut() {
            ids.sort_unstable();
        }
        catalog
    }

    pub fn template(&self, id: TemplateId) -> Option<&QuestionTemplate> {
        self.templates.get(&id)
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn track_by_name(&self, name: &str) -> Option<&Track> {
        self.by_name.get(name).and_then(|id| self.tracks.get(id))
    }

    /// Every valid template of a track, in id order.
    pub fn templates_for_track(&self, track: TrackId) -> Vec<&QuestionTemplate> {
        self.by_track
            .get(&track)
            .map(|ids| ids.iter().filter_map(|id| self.templates.get(id)).collect())
            .unwrap_or_default()
    }

    /// Track names in id order, as offered to participants.
    pub fn track_names(&self) -> Vec<String> {
        let mut tracks: Vec<&Track> = self.tracks.values().collect();
        tracks.sort_by_key(|t| t.id);
        tracks.into_iter().map(|t| t.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::AnswerKind;

    fn track(id: i64, name: &str, duration_days: i32) -> Track {
        Track {
            id,
            name: name.to_string(),
            duration_days,
        }
    }

    fn template(id: i64, track_id: i64, interval_days: i32) -> QuestionTemplate {
        template_with_delay(id, track_id, interval_days, 0)
    }

    fn template_with_delay(
        id: i64,
        track_id: i64,
        interval_days: i32,
        delay_days: i32,
    ) -> QuestionTemplate {
        QuestionTemplate {
            id,
            track_id,
            text: format!("question {id}"),
            kind: AnswerKind::YesNo,
            choices: None,
            interval_days,
            delay_days,
        }
    }

    #[test]
    fn invalid_templates_never_reach_the_index() {
        let catalog = TemplateCatalog::from_stored(StoredCatalog {
            tracks: vec![track(1, "1 month", 30)],
            templates: vec![
                template(3, 1, 0),
                template(2, 1, 10),
                template(4, 9, 1),
                template_with_delay(5, 1, 1, i32::MAX),
            ],
        });
        assert!(catalog.template(3).is_none(), "zero interval must be rejected");
        assert!(catalog.template(4).is_none(), "orphan template must be rejected");
        assert!(catalog.template(5).is_none(), "oversized delay must be rejected");
        let ids: Vec<i64> = catalog.templates_for_track(1).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn tracks_resolve_by_name_in_id_order() {
        let catalog = TemplateCatalog::from_stored(StoredCatalog {
            tracks: vec![
                track(2, "2 months", 60),
                track(1, "1 month", 30),
                track(3, "bad", -1),
                track(4, "forever", 2_000_000_000),
            ],
            templates: vec![],
        });
        assert_eq!(catalog.track_names(), vec!["1 month", "2 months"]);
        assert_eq!(catalog.track_by_name("2 months").map(|t| t.id), Some(2));
        assert!(catalog.track_by_name("bad").is_none());
        assert!(catalog.track_by_name("forever").is_none());
        assert!(catalog.templates_for_track(1).is_empty());
    }
}
