//! Domain entities shared by the store, the scheduler and the front-end.
//!
//! Identifiers are plain `i64`s: participants are addressed by their chat id,
//! every other entity by its store-assigned row id.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PulseError;

pub type ParticipantId = i64;
pub type TrackId = i64;
pub type TemplateId = i64;
pub type EnrollmentId = i64;
pub type OccurrenceId = i64;
pub type AnswerId = i64;

/// The two canonical tokens accepted for a yes/no question.
pub const YES_NO_TOKENS: [&str; 2] = ["Yes", "No"];

/// Upper bound for a track's duration and a template's delay, in days.
///
/// Keeps every generated timestamp representable and bounds the number of
/// occurrences one enrollment can create.
pub const MAX_WINDOW_DAYS: i32 = 3660;

// ── Participants ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub username: Option<String>,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
}

// ── Reference data ────────────────────────────────────────────

/// A named program with a fixed observation window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub duration_days: i32,
}

impl Track {
    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.duration_days))
    }

    pub fn validate(&self) -> Result<(), PulseError> {
        let invalid = |reason: String| PulseError::InvalidTrack {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if !(0..=MAX_WINDOW_DAYS).contains(&self.duration_days) {
            return Err(invalid(format!(
                "duration_days must be within 0..={MAX_WINDOW_DAYS}, got {}",
                self.duration_days
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    ChoiceSet,
    YesNo,
}

impl AnswerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChoiceSet => "choice_set",
            Self::YesNo => "yes_no",
        }
    }
}

impl fmt::Display for AnswerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "choice_set" | "multiple_choice" => Ok(Self::ChoiceSet),
            "yes_no" => Ok(Self::YesNo),
            other => Err(format!("unknown answer kind '{other}'")),
        }
    }
}

/// A recurring question belonging to one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionTemplate {
    pub id: TemplateId,
    pub track_id: TrackId,
    pub text: String,
    pub kind: AnswerKind,
    /// Present iff `kind == ChoiceSet`.
    pub choices: Option<Vec<String>>,
    pub interval_days: i32,
    pub delay_days: i32,
}

impl QuestionTemplate {
    /// Reject templates the occurrence generator cannot expand safely.
    pub fn validate(&self) -> Result<(), PulseError> {
        let invalid = |reason: String| PulseError::InvalidTemplate {
            text: self.text.clone(),
            reason,
        };

        if self.text.trim().is_empty() {
            return Err(invalid("text must not be empty".to_string()));
        }
        if self.interval_days < 1 {
            return Err(invalid(format!(
                "interval_days must be >= 1, got {}",
                self.interval_days
            )));
        }
        if !(0..=MAX_WINDOW_DAYS).contains(&self.delay_days) {
            return Err(invalid(format!(
                "delay_days must be within 0..={MAX_WINDOW_DAYS}, got {}",
                self.delay_days
            )));
        }
        match (self.kind, &self.choices) {
            (AnswerKind::ChoiceSet, None) => {
                Err(invalid("choice_set question requires choices".to_string()))
            }
            (AnswerKind::ChoiceSet, Some(c)) if c.is_empty() => {
                Err(invalid("choice_set question requires at least one choice".to_string()))
            }
            (AnswerKind::YesNo, Some(_)) => {
                Err(invalid("yes_no question must not carry choices".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// The reply options presented alongside this question.
    pub fn affordances(&self) -> Affordances {
        match self.kind {
            AnswerKind::YesNo => Affordances::YesNo,
            AnswerKind::ChoiceSet => Affordances::Choices(self.choices.clone().unwrap_or_default()),
        }
    }
}

/// Reply options attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "labels", rename_all = "snake_case")]
pub enum Affordances {
    /// Free text; any previously shown options are withdrawn.
    None,
    YesNo,
    Choices(Vec<String>),
}

impl Affordances {
    /// Button labels, in presentation order.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            Self::None => Vec::new(),
            Self::YesNo => YES_NO_TOKENS.to_vec(),
            Self::Choices(choices) => choices.iter().map(String::as_str).collect(),
        }
    }

    /// Exact, case-sensitive match against the offered labels.
    ///
    /// `None` offers nothing, so it accepts nothing.
    pub fn accepts(&self, raw: &str) -> bool {
        self.labels().iter().any(|label| *label == raw)
    }
}

// ── Schedule state ────────────────────────────────────────────

/// A participant's registration into a track. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub participant_id: ParticipantId,
    pub track_id: TrackId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnrollment {
    pub participant_id: ParticipantId,
    pub track_id: TrackId,
    pub started_at: DateTime<Utc>,
}

/// One generated delivery slot, before it has a row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedOccurrence {
    pub template_id: TemplateId,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub enrollment_id: EnrollmentId,
    pub template_id: TemplateId,
    pub scheduled_at: DateTime<Utc>,
    /// `Some` iff delivered; the transition is one-way except for a
    /// released claim after a failed delivery.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Set when the delivery scanner could not build the message; a held
    /// occurrence is no longer due.
    pub held_at: Option<DateTime<Utc>>,
}

impl Occurrence {
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }
}

/// An occurrence joined with the participant it is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueOccurrence {
    pub occurrence_id: OccurrenceId,
    pub enrollment_id: EnrollmentId,
    pub template_id: TemplateId,
    pub participant_id: ParticipantId,
    pub scheduled_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub occurrence_id: OccurrenceId,
    pub text: String,
    pub answered_at: DateTime<Utc>,
}

// ── Conversation ──────────────────────────────────────────────

/// Where a participant is in the registration/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    AwaitingName,
    AwaitingTrack { name: String },
    Answering,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(kind: AnswerKind, choices: Option<Vec<&str>>, interval: i32, delay: i32) -> QuestionTemplate {
        QuestionTemplate {
            id: 1,
            track_id: 1,
            text: "How are you feeling today?".to_string(),
            kind,
            choices: choices.map(|c| c.into_iter().map(String::from).collect()),
            interval_days: interval,
            delay_days: delay,
        }
    }

    #[test]
    fn valid_choice_template_passes() {
        let t = template(AnswerKind::ChoiceSet, Some(vec!["Good", "Bad"]), 1, 0);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn zero_interval_rejected() {
        let t = template(AnswerKind::YesNo, None, 0, 0);
        let err = t.validate().unwrap_err().to_string();
        assert!(err.contains("interval_days must be >= 1"), "{err}");
    }

    #[test]
    fn negative_delay_rejected() {
        let t = template(AnswerKind::YesNo, None, 3, -1);
        assert!(t.validate().is_err());
    }

    #[test]
    fn delay_beyond_window_rejected() {
        let err = template(AnswerKind::YesNo, None, 1, MAX_WINDOW_DAYS + 1)
            .validate()
            .unwrap_err()
            .to_string();
        assert!(err.contains("delay_days"), "{err}");
        assert!(template(AnswerKind::YesNo, None, 1, MAX_WINDOW_DAYS).validate().is_ok());
    }

    #[test]
    fn track_duration_is_bounded() {
        let track = |duration_days| Track {
            id: 1,
            name: "1 month".to_string(),
            duration_days,
        };
        assert!(track(30).validate().is_ok());
        assert!(track(-1).validate().is_err());
        assert!(track(2_000_000_000).validate().is_err());
        assert!(Track { name: " ".to_string(), ..track(30) }.validate().is_err());
    }

    #[test]
    fn choice_set_without_choices_rejected() {
        assert!(template(AnswerKind::ChoiceSet, None, 1, 0).validate().is_err());
        assert!(template(AnswerKind::ChoiceSet, Some(vec![]), 1, 0).validate().is_err());
    }

    #[test]
    fn yes_no_with_choices_rejected() {
        assert!(template(AnswerKind::YesNo, Some(vec!["Yes"]), 1, 0).validate().is_err());
    }

    #[test]
    fn yes_no_affordances_accept_only_canonical_tokens() {
        let a = template(AnswerKind::YesNo, None, 10, 10).affordances();
        assert!(a.accepts("Yes"));
        assert!(a.accepts("No"));
        assert!(!a.accepts("yes"));
        assert!(!a.accepts("Maybe"));
    }

    #[test]
    fn choice_affordances_are_case_sensitive() {
        let a = template(
            AnswerKind::ChoiceSet,
            Some(vec!["Very good", "Good", "Satisfactory", "Bad"]),
            1,
            0,
        )
        .affordances();
        assert!(a.accepts("Good"));
        assert!(!a.accepts("good"));
        assert!(!a.accepts(" Good"));
        assert_eq!(a.labels(), vec!["Very good", "Good", "Satisfactory", "Bad"]);
    }

    #[test]
    fn none_affordances_accept_nothing() {
        assert!(!Affordances::None.accepts(""));
        assert!(Affordances::None.labels().is_empty());
    }

    #[test]
    fn answer_kind_parses_legacy_name() {
        assert_eq!("multiple_choice".parse::<AnswerKind>().unwrap(), AnswerKind::ChoiceSet);
        assert_eq!("yes_no".parse::<AnswerKind>().unwrap(), AnswerKind::YesNo);
        assert!("free_text".parse::<AnswerKind>().is_err());
    }

    #[test]
    fn session_state_serializes_tagged() {
        let json = serde_json::to_value(SessionState::AwaitingTrack {
            name: "Aru".to_string(),
        })
        .unwrap();
        assert_eq!(json["state"], "awaiting_track");
        assert_eq!(json["name"], "Aru");
        let back: SessionState = serde_json::from_value(json).unwrap();
        assert_eq!(back, SessionState::AwaitingTrack { name: "Aru".to_string() });
    }
}
