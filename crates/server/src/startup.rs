//! Bootstrap helpers: store and channel selection, shutdown signal.

use std::sync::Arc;

use anyhow::Context;
use pulse_core::config::{PostgresConfig, TelegramConfig};
use pulse_notify::{ConsoleNotifier, Notifier, NotifyError, TelegramNotifier};
use pulse_store::{MemoryStore, PgStore, ScheduleStore};
use tracing::{info, warn};

use crate::cli::StoreKind;

pub async fn open_store(
    kind: StoreKind,
    postgres: &PostgresConfig,
) -> anyhow::Result<Arc<dyn ScheduleStore>> {
    match kind {
        StoreKind::Postgres => {
            if !postgres.is_configured() {
                warn!("neither DATABASE_URL nor PG_USERNAME set, trying local defaults");
            }
            let store = PgStore::connect(postgres)
                .await
                .context("failed to open PostgreSQL store")?;
            Ok(Arc::new(store))
        }
        StoreKind::Memory => {
            warn!("using in-memory store; schedule state is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Telegram when a bot token is configured, the console otherwise.
pub fn build_notifier(telegram: &TelegramConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match &telegram.bot_token {
        Some(token) => {
            let notifier = TelegramNotifier::from_config(token.clone(), telegram.api_base.clone())?;
            info!(api = %telegram.api_base, "Telegram channel ready");
            Ok(Arc::new(notifier))
        }
        None => {
            warn!("BOT_TOKEN not set, deliveries go to the console");
            Ok(Arc::new(ConsoleNotifier::new()))
        }
    }
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to register signal handlers, falling back to ctrl-c");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
        }
    }
}
