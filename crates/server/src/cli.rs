//! Command-line arguments for `pulse-bot`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Questionnaire bot: delivers scheduled questions, reminds, records answers.
#[derive(Parser, Debug)]
#[command(name = "pulse-bot", version, about)]
pub struct Cli {
    /// Backing store for schedule state.
    #[arg(long, env = "PULSE_STORE", value_enum, default_value_t = StoreKind::Postgres)]
    pub store: StoreKind,

    /// Run one delivery tick and one reminder tick, then exit.
    #[arg(long, env = "PULSE_ONCE")]
    pub once: bool,

    /// YAML catalog of tracks and questions (overrides CATALOG_PATH).
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Postgres,
    /// Process-local; schedule state is lost on exit.
    Memory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_once() {
        let cli = Cli::try_parse_from(["pulse-bot", "--store", "memory", "--once"]).unwrap();
        assert_eq!(cli.store, StoreKind::Memory);
        assert!(cli.once);
        assert!(cli.catalog.is_none());
    }

    #[test]
    fn catalog_path_is_taken_verbatim() {
        let cli = Cli::try_parse_from(["pulse-bot", "--store", "postgres", "--catalog", "cfg/tracks.yaml"])
            .unwrap();
        assert_eq!(cli.catalog, Some(PathBuf::from("cfg/tracks.yaml")));
    }

    #[test]
    fn unknown_store_rejected() {
        assert!(Cli::try_parse_from(["pulse-bot", "--store", "sqlite"]).is_err());
    }
}
