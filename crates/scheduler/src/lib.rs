//! Occurrence scheduling and delivery engine.
//!
//! - [`TemplateCatalog`]: validated tracks and question templates
//! - [`generator`]: expands an enrollment into its delivery timeline
//! - [`EnrollmentService`]: enrollment plus its occurrences, atomically
//! - [`DeliveryScanner`]: claim, deliver, release on failure
//! - [`ReminderScanner`]: re-notify unanswered deliveries past the grace period
//! - [`AnswerRecorder`]: validate and persist a participant's reply
//! - [`JobRunner`]: drives the scanners on their periods until shutdown

pub mod answer;
pub mod catalog;
pub mod delivery;
pub mod enrollment;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod reminder;
pub mod runner;

#[cfg(test)]
mod testing;

pub use answer::{AnswerRecorder, RecordOutcome};
pub use catalog::TemplateCatalog;
pub use delivery::DeliveryScanner;
pub use enrollment::EnrollmentService;
pub use error::SchedulerError;
pub use metrics::{MetricsSnapshot, ScanMetrics, TickReport};
pub use reminder::ReminderScanner;
pub use runner::{JobRunner, PeriodicJob};
