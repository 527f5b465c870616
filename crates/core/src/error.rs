use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Invalid question template '{text}': {reason}")]
    InvalidTemplate { text: String, reason: String },

    #[error("Invalid track '{name}': {reason}")]
    InvalidTrack { name: String, reason: String },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
