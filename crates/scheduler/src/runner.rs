//! Periodic job runner.
//!
//! A [`JobRunner`] fires one [`PeriodicJob`] on a fixed period until a shared
//! shutdown [`Notify`] is triggered. A failing tick is logged and the next
//! one runs on schedule; nothing a job returns stops the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::metrics::{ScanMetrics, TickReport};

/// A unit of periodic work.
#[async_trait::async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &str;

    /// Execute one tick against the current wall clock.
    async fn run_once(&self) -> Result<TickReport, SchedulerError>;
}

pub struct JobRunner {
    job: Arc<dyn PeriodicJob>,
    period: Duration,
    metrics: Arc<ScanMetrics>,
}

impl JobRunner {
    pub fn new(job: Arc<dyn PeriodicJob>, period: Duration) -> Self {
        Self {
            job,
            period,
            metrics: Arc::new(ScanMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<ScanMetrics> {
        self.metrics.clone()
    }

    /// Run one tick and record its outcome.
    pub async fn tick(&self) {
        let name = self.job.name();
        match self.job.run_once().await {
            Ok(report) => {
                self.metrics.record_report(&report, Utc::now());
                if report.examined > 0 {
                    info!(job = %name, tick_id = %report.tick_id, "{}", report);
                }
            }
            Err(e) => {
                self.metrics.record_failure(Utc::now());
                warn!(job = %name, error = %e, "tick failed, retrying next interval");
            }
        }
    }

    /// Tick immediately, then every period, until `shutdown` is notified.
    ///
    /// An in-flight tick always runs to completion; the shutdown request is
    /// observed before the next one starts.
    pub async fn run(self, shutdown: Arc<Notify>) {
        let name = self.job.name().to_string();
        info!(job = %name, period = ?self.period, "job runner started");

        let notified = shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut notified => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(
            job = %name,
            ticks = snapshot.ticks,
            failed_ticks = snapshot.failed_ticks,
            sent = snapshot.sent,
            delivery_failures = snapshot.delivery_failures,
            "job runner stopped"
        );
    }
}
