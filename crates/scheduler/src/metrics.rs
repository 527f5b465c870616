//! Per-tick reports and cumulative per-job counters.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Outcome of one scanner tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick_id: Uuid,
    /// Rows read from the store this tick.
    pub examined: usize,
    /// Messages the channel accepted.
    pub sent: usize,
    /// Rows another tick claimed first.
    pub already_claimed: usize,
    /// Rows that could not be built from the catalog. The delivery scanner
    /// also holds them so they leave the due set.
    pub skipped: usize,
    /// Channel failures and timeouts.
    pub failed: usize,
    /// Failed deliveries whose claim could not be released.
    pub unreleased: usize,
    /// In-flight claims of an interrupted tick, confirmed at tick start.
    pub settled: u64,
}

impl TickReport {
    pub fn new(tick_id: Uuid) -> Self {
        Self {
            tick_id,
            examined: 0,
            sent: 0,
            already_claimed: 0,
            skipped: 0,
            failed: 0,
            unreleased: 0,
            settled: 0,
        }
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined={} sent={} already_claimed={} skipped={} failed={} unreleased={} settled={}",
            self.examined,
            self.sent,
            self.already_claimed,
            self.skipped,
            self.failed,
            self.unreleased,
            self.settled
        )
    }
}

/// Lock-free counters for one periodic job.
#[derive(Debug, Default)]
pub struct ScanMetrics {
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    sent: AtomicU64,
    delivery_failures: AtomicU64,
    /// Unix millis of the last finished tick; 0 = never.
    last_tick_ms: AtomicI64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub sent: u64,
    pub delivery_failures: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_report(&self, report: &TickReport, at: DateTime<Utc>) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.sent.fetch_add(report.sent as u64, Ordering::Relaxed);
        self.delivery_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.last_tick_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_failure(&self, at: DateTime<Utc>) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
        self.last_tick_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_ms = self.last_tick_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            last_tick: (last_ms != 0)
                .then(|| Utc.timestamp_millis_opt(last_ms).single())
                .flatten(),
        }
    }
}
