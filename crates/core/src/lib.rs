pub mod catalog;
pub mod config;
pub mod error;
pub mod model;

pub use catalog::{CatalogDocument, QuestionSpec, TrackSpec};
pub use config::Config;
pub use error::*;
pub use model::*;
