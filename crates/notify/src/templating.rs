//! Minijinja rendering of question and reminder messages.
//!
//! Both message shapes are configurable strings (`QUESTION_TEMPLATE`,
//! `REMINDER_TEMPLATE`). They are checked once when the renderer is built, so
//! a typo surfaces at start-up rather than on the first scanner tick.

use chrono::{DateTime, Utc};
use pulse_core::config::MessageConfig;
use pulse_core::QuestionTemplate;

use crate::traits::NotifyError;

/// Context data available to message templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageContext<'a> {
    /// The question text.
    pub text: &'a str,
    /// `"choice_set"` or `"yes_no"`.
    pub kind: &'static str,
    /// Offered answer labels, in order.
    pub choices: Vec<&'a str>,
    /// When the occurrence was scheduled, ISO 8601.
    pub scheduled_at: String,
}

impl<'a> MessageContext<'a> {
    pub fn new(template: &'a QuestionTemplate, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            text: &template.text,
            kind: template.kind.as_str(),
            choices: template
                .choices
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(String::as_str)
                .collect(),
            scheduled_at: scheduled_at.to_rfc3339(),
        }
    }
}

/// Renders question and reminder messages.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    question: String,
    reminder: String,
}

impl MessageRenderer {
    /// Build a renderer, rejecting templates with syntax errors.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if either template does not parse.
    pub fn new(config: &MessageConfig) -> Result<Self, NotifyError> {
        let env = Self::build_env();
        env.template_from_str(&config.question_template)
            .map_err(|e| NotifyError::Template(format!("question template: {e}")))?;
        env.template_from_str(&config.reminder_template)
            .map_err(|e| NotifyError::Template(format!("reminder template: {e}")))?;
        Ok(Self {
            question: config.question_template.clone(),
            reminder: config.reminder_template.clone(),
        })
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env
    }

    fn render(&self, template_str: &str, ctx: &MessageContext<'_>) -> Result<String, NotifyError> {
        Self::build_env()
            .render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Render the message for a first delivery.
    pub fn render_question(&self, ctx: &MessageContext<'_>) -> Result<String, NotifyError> {
        self.render(&self.question, ctx)
    }

    /// Render the message for a reminder of an unanswered delivery.
    pub fn render_reminder(&self, ctx: &MessageContext<'_>) -> Result<String, NotifyError> {
        self.render(&self.reminder, ctx)
    }
}

impl Default for MessageRenderer {
    fn default() -> Self {
        let config = MessageConfig::default();
        Self {
            question: config.question_template,
            reminder: config.reminder_template,
        }
    }
}

/// Custom filter: lowercase a string.
fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

/// Custom filter: uppercase a string.
fn upper_filter(value: String) -> String {
    value.to_uppercase()
}
