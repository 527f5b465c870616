use pulse_core::{PulseError, TemplateId};
use pulse_notify::NotifyError;
use pulse_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Core(#[from] PulseError),

    #[error("unknown track: {0}")]
    UnknownTrack(String),

    #[error("question template {0} is not in the catalog")]
    TemplateNotLoaded(TemplateId),
}
