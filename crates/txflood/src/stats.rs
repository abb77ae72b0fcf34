use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Failure messages are grouped by their first `MAX_REASON_LEN` characters.
pub const MAX_REASON_LEN: usize = 100;

/// Counters collected over one timed run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Extra submissions caused by transient errors
    pub retries: u64,
    pub failure_reasons: HashMap<String, u64>,
}

impl RunStats {
    /// Attempts that have started but not yet recorded an outcome.
    pub const fn in_flight(&self) -> u64 {
        self.attempted.saturating_sub(self.succeeded + self.failed)
    }

    /// Failure reasons, most frequent first.
    pub fn sorted_reasons(&self) -> Vec<(&str, u64)> {
        let mut reasons: Vec<(&str, u64)> =
            self.failure_reasons.iter().map(|(reason, count)| (reason.as_str(), *count)).collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        reasons
    }
}

/// Thread-safe recorder shared by every dispatch worker.
///
/// All updates go through one mutex so no increment is lost.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<RunStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_attempt(&self) {
        self.lock().attempted += 1;
    }

    pub fn record_retry(&self) {
        self.lock().retries += 1;
    }

    pub fn record_success(&self) {
        self.lock().succeeded += 1;
    }

    pub fn record_failure(&self, reason: &str) {
        let reason = truncate_reason(reason);
        let mut stats = self.lock();
        stats.failed += 1;
        *stats.failure_reasons.entry(reason).or_insert(0) += 1;
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> RunStats {
        self.lock().clone()
    }
}

/// Cuts `reason` to at most `MAX_REASON_LEN` characters.
pub fn truncate_reason(reason: &str) -> String {
    match reason.char_indices().nth(MAX_REASON_LEN) {
        Some((end, _)) => reason[..end].to_string(),
        None => reason.to_string(),
    }
}

/// Outcome of a complete timed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stats: RunStats,
    pub elapsed: Duration,
    pub target_tps: u32,
    pub batches: u64,
}

impl RunReport {
    pub fn achieved_tps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 { 0.0 } else { self.stats.succeeded as f64 / secs }
    }

    pub fn achievement_pct(&self) -> f64 {
        if self.target_tps == 0 {
            0.0
        } else {
            self.achieved_tps() / f64::from(self.target_tps) * 100.0
        }
    }
}

/// Logs a progress line every `interval` until `shutdown` fires.
pub(crate) async fn run_stats_reporter(
    stats: Arc<StatsAggregator>,
    started: Instant,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => log_progress(&stats.snapshot(), started.elapsed()),
            _ = shutdown.cancelled() => break,
        }
    }
}

fn log_progress(stats: &RunStats, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let tps = if secs <= 0.0 { 0.0 } else { stats.succeeded as f64 / secs };
    info!(
        elapsed_secs = format!("{secs:.0}"),
        sent = stats.attempted,
        success = stats.succeeded,
        failed = stats.failed,
        in_flight = stats.in_flight(),
        tps = format!("{tps:.2}"),
        "Progress"
    );
}

pub fn print_final_report(report: &RunReport) {
    let stats = &report.stats;
    info!("=== Test Results ===");
    info!(
        duration_secs = format!("{:.2}", report.elapsed.as_secs_f64()),
        batches = report.batches,
        total = stats.attempted,
        successful = stats.succeeded,
        failed = stats.failed,
        retries = stats.retries,
        "Totals"
    );
    info!(
        actual_tps = format!("{:.2}", report.achieved_tps()),
        target_tps = report.target_tps,
        achievement = format!("{:.2}%", report.achievement_pct()),
        "Throughput"
    );

    if !stats.failure_reasons.is_empty() {
        info!("=== Error Summary ===");
        for (reason, count) in stats.sorted_reasons() {
            info!(occurrences = count, reason, "Failure reason");
        }
    }
}
