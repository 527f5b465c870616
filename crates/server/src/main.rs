//! pulse-bot: scheduled questionnaire delivery over Telegram.
//!
//! Runs two background scanners (delivery, reminders) and, when a bot token
//! is configured, the inbound conversation loop, until SIGINT/SIGTERM.

mod cli;
mod conversation;
mod polling;
mod startup;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, warn};

use pulse_core::CatalogDocument;
use pulse_notify::{MessageRenderer, UpdatePoller};
use pulse_scheduler::{DeliveryScanner, JobRunner, PeriodicJob, ReminderScanner, TemplateCatalog};

use crate::cli::Cli;
use crate::conversation::Conversation;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    pulse_core::config::load_dotenv();
    let cli = Cli::parse();
    let mut config = pulse_core::Config::from_env();
    if let Some(path) = cli.catalog.clone() {
        config.catalog.path = Some(path);
    }
    config.log_summary();

    let store = startup::open_store(cli.store, &config.postgres).await?;

    let document = CatalogDocument::load(config.catalog.path.as_deref())?;
    store.seed_catalog(&document).await?;
    let catalog = Arc::new(TemplateCatalog::load(store.as_ref()).await?);

    let notifier = startup::build_notifier(&config.telegram)?;
    let renderer = MessageRenderer::new(&config.messages)?;
    let scheduler = &config.scheduler;

    let delivery = Arc::new(
        DeliveryScanner::new(store.clone(), catalog.clone(), notifier.clone(), renderer.clone())
            .with_timeout(scheduler.delivery_timeout())
            .with_batch_limit(scheduler.delivery_batch_limit),
    );
    let reminder = Arc::new(
        ReminderScanner::new(
            store.clone(),
            catalog.clone(),
            notifier.clone(),
            renderer,
            scheduler.reminder_grace(),
        )
        .with_timeout(scheduler.delivery_timeout()),
    );

    if cli.once {
        let delivered = delivery.run_once().await?;
        info!(tick_id = %delivered.tick_id, "delivery: {}", delivered);
        let reminded = reminder.run_once().await?;
        info!(tick_id = %reminded.tick_id, "reminder: {}", reminded);
        return Ok(());
    }

    let shutdown = Arc::new(Notify::new());
    let mut tasks = vec![
        tokio::spawn(JobRunner::new(delivery, scheduler.delivery_interval()).run(shutdown.clone())),
        tokio::spawn(JobRunner::new(reminder, scheduler.reminder_interval()).run(shutdown.clone())),
    ];

    match &config.telegram.bot_token {
        Some(token) => {
            let poller = UpdatePoller::from_config(
                token.clone(),
                config.telegram.api_base.clone(),
                Duration::from_secs(config.telegram.poll_timeout_secs),
            )?;
            let conversation = Arc::new(Conversation::new(store.clone(), catalog.clone(), notifier.clone()));
            tasks.push(tokio::spawn(polling::run(poller, conversation, shutdown.clone())));
        }
        None => warn!("inbound conversation disabled without BOT_TOKEN"),
    }

    info!("pulse-bot running");
    startup::shutdown_signal().await;
    info!("shutdown signal received");
    shutdown.notify_waiters();

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }

    info!("pulse-bot exited cleanly");
    Ok(())
}
