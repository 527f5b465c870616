//! Reference-data document: tracks and their question templates.
//!
//! The document is authored in YAML and carries no row ids; the store assigns
//! them when the catalog is seeded. A built-in document ships with the binary
//! and is used when no `CATALOG_PATH` is configured.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PulseError;
use crate::model::{AnswerKind, QuestionTemplate, Track};

const BUILTIN_CATALOG: &str = r#"
tracks:
  - name: "1 month"
    duration_days: 30
    questions:
      - text: "How are you feeling today?"
        kind: choice_set
        choices: ["Very good", "Good", "Satisfactory", "Bad"]
        interval_days: 1
        delay_days: 0
      - text: "Did you take your medication regularly?"
        kind: yes_no
        interval_days: 10
        delay_days: 10
  - name: "2 months"
    duration_days: 60
    questions:
      - text: "How is your overall health?"
        kind: choice_set
        choices: ["Very good", "Good", "Satisfactory", "Bad"]
        interval_days: 5
        delay_days: 5
  - name: "3 months"
    duration_days: 90
    questions:
      - text: "How is your energy level?"
        kind: choice_set
        choices: ["High", "Medium", "Low"]
        interval_days: 3
        delay_days: 2
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub tracks: Vec<TrackSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSpec {
    pub name: String,
    pub duration_days: i32,
    #[serde(default)]
    pub questions: Vec<QuestionSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub text: String,
    pub kind: AnswerKind,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    pub interval_days: i32,
    #[serde(default)]
    pub delay_days: i32,
}

impl TrackSpec {
    /// Materialize as a track with a placeholder id, mainly for validation.
    pub fn to_track(&self, id: i64) -> Track {
        Track {
            id,
            name: self.name.clone(),
            duration_days: self.duration_days,
        }
    }
}

impl QuestionSpec {
    /// Materialize as a template with placeholder ids, mainly for validation.
    pub fn to_template(&self, id: i64, track_id: i64) -> QuestionTemplate {
        QuestionTemplate {
            id,
            track_id,
            text: self.text.clone(),
            kind: self.kind,
            choices: self.choices.clone(),
            interval_days: self.interval_days,
            delay_days: self.delay_days,
        }
    }
}

impl CatalogDocument {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, PulseError> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, PulseError> {
        let doc: Self =
            serde_yaml::from_str(yaml).map_err(|e| PulseError::Catalog(e.to_string()))?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn from_file(path: &Path) -> Result<Self, PulseError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Load from `path` if given, otherwise fall back to the built-in catalog.
    pub fn load(path: Option<&Path>) -> Result<Self, PulseError> {
        match path {
            Some(p) => {
                tracing::info!(path = %p.display(), "loading catalog file");
                Self::from_file(p)
            }
            None => Self::builtin(),
        }
    }

    /// Check every track and template before anything reaches the store.
    pub fn validate(&self) -> Result<(), PulseError> {
        let mut names = HashSet::new();
        for track in &self.tracks {
            track.to_track(0).validate()?;
            if !names.insert(track.name.as_str()) {
                return Err(PulseError::InvalidTrack {
                    name: track.name.clone(),
                    reason: "duplicate track name".to_string(),
                });
            }
            for question in &track.questions {
                question.to_template(0, 0).validate()?;
            }
        }
        Ok(())
    }

    pub fn track_names(&self) -> Vec<&str> {
        self.tracks.iter().map(|t| t.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_parses_and_validates() {
        let doc = CatalogDocument::builtin().unwrap();
        assert_eq!(doc.track_names(), vec!["1 month", "2 months", "3 months"]);
        assert!(doc.validate().is_ok());

        let first = &doc.tracks[0];
        assert_eq!(first.duration_days, 30);
        assert_eq!(first.questions.len(), 2);
        assert_eq!(first.questions[1].kind, AnswerKind::YesNo);
        assert_eq!(first.questions[1].interval_days, 10);
        assert_eq!(first.questions[1].delay_days, 10);
    }

    #[test]
    fn zero_interval_rejected_at_load() {
        let yaml = r#"
tracks:
  - name: "broken"
    duration_days: 10
    questions:
      - text: "Loop forever?"
        kind: yes_no
        interval_days: 0
"#;
        let err = CatalogDocument::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("interval_days"), "{err}");
    }

    #[test]
    fn oversized_duration_rejected_at_load() {
        let yaml = r#"
tracks:
  - name: "forever"
    duration_days: 2000000000
    questions:
      - text: "Still there?"
        kind: yes_no
        interval_days: 1
"#;
        let err = CatalogDocument::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, PulseError::InvalidTrack { ref name, .. } if name == "forever"));
    }

    #[test]
    fn duplicate_track_names_rejected() {
        let yaml = r#"
tracks:
  - name: "a"
    duration_days: 10
  - name: "a"
    duration_days: 20
"#;
        let err = CatalogDocument::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("duplicate"), "{err}");
    }

    #[test]
    fn delay_defaults_to_zero() {
        let yaml = r#"
tracks:
  - name: "short"
    duration_days: 3
    questions:
      - text: "Slept well?"
        kind: yes_no
        interval_days: 1
"#;
        let doc = CatalogDocument::from_yaml(yaml).unwrap();
        assert_eq!(doc.tracks[0].questions[0].delay_days, 0);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(
            &path,
            "tracks:\n  - name: \"week\"\n    duration_days: 7\n",
        )
        .unwrap();
        let doc = CatalogDocument::load(Some(&path)).unwrap();
        assert_eq!(doc.track_names(), vec!["week"]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = CatalogDocument::load(Some(Path::new("/nonexistent/catalog.yaml"))).unwrap_err();
        assert!(matches!(err, PulseError::Io(_)));
    }
}
