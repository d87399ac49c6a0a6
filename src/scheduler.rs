use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::cycle::QueryCycleRunner;
use crate::models::Query;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSummary {
    pub round: u64,
    pub queries: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_items: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub rounds_completed: u64,
    pub queries_succeeded: u64,
    pub queries_failed: u64,
    pub panics: u64,
    pub new_items_found: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub started_at: DateTime<Utc>,
    pub last_round_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SchedulerStats {
    fn default() -> Self {
        Self {
            rounds_completed: 0,
            queries_succeeded: 0,
            queries_failed: 0,
            panics: 0,
            new_items_found: 0,
            notifications_sent: 0,
            notifications_failed: 0,
            started_at: Utc::now(),
            last_round_at: None,
            last_error: None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolves once `signal` reports a stop request. A signal source that fails
/// to install never resolves, so the loop keeps running until killed.
pub async fn wait_for_stop<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!(error = %e, "Failed to listen for Ctrl-C, stop the process to exit");
        std::future::pending::<()>().await;
    }
}

/// Runs every query once per round, forever or for a fixed number of rounds.
pub struct SchedulerLoop {
    runner: QueryCycleRunner,
    queries: Vec<Query>,
    interval_min: u64,
    interval_max: u64,
    inter_query_delay: Duration,
    rng: StdRng,
    stats: SchedulerStats,
}

impl SchedulerLoop {
    pub fn new(runner: QueryCycleRunner, queries: Vec<Query>, config: &SchedulerConfig) -> Self {
        Self {
            runner,
            queries,
            interval_min: config.interval_min_secs,
            interval_max: config.interval_max_secs.max(config.interval_min_secs),
            inter_query_delay: Duration::from_millis(config.inter_query_delay_ms),
            rng: StdRng::from_rng(&mut rand::rng()),
            stats: SchedulerStats::default(),
        }
    }

    /// Fixes the random source, making the inter-round delays reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn runner(&self) -> &QueryCycleRunner {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut QueryCycleRunner {
        &mut self.runner
    }

    /// Uniform draw from `[interval_min, interval_max]` seconds.
    pub fn next_round_delay(&mut self) -> Duration {
        Duration::from_secs(self.rng.random_range(self.interval_min..=self.interval_max))
    }

    /// Runs rounds until `max_rounds` is reached, or forever when `None`.
    pub async fn run(&mut self, max_rounds: Option<u64>) {
        let mut round = 0;
        loop {
            round += 1;
            self.run_round(round).await;

            if max_rounds.is_some_and(|max| round >= max) {
                info!(rounds = round, "Round limit reached");
                break;
            }

            let delay = self.next_round_delay();
            info!(round, sleep_secs = delay.as_secs(), "Sleeping before next round");
            sleep(delay).await;
        }
    }

    pub async fn run_round(&mut self, round: u64) -> RoundSummary {
        let started = Instant::now();
        info!(round, queries = self.queries.len(), "Starting check round");

        self.runner.refresh_rate().await;

        let mut succeeded = 0;
        let mut failed = 0;
        let mut new_items = 0;

        for (i, query) in self.queries.iter().enumerate() {
            if i > 0 && !self.inter_query_delay.is_zero() {
                debug!(delay_ms = self.inter_query_delay.as_millis() as u64, "Waiting before next query");
                sleep(self.inter_query_delay).await;
            }

            let outcome = AssertUnwindSafe(self.runner.run_query(query))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(report)) => {
                    succeeded += 1;
                    new_items += report.new_items;
                    self.stats.queries_succeeded += 1;
                    self.stats.new_items_found += report.new_items as u64;
                    self.stats.notifications_sent += report.notified as u64;
                    self.stats.notifications_failed += report.failed_notifications as u64;
                }
                Ok(Err(e)) => {
                    failed += 1;
                    self.stats.queries_failed += 1;
                    self.stats.last_error = Some(e.to_string());
                    warn!(query = %query, stage = %e.stage, "Query skipped this round");
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    failed += 1;
                    self.stats.queries_failed += 1;
                    self.stats.panics += 1;
                    self.stats.last_error = Some(format!("panic: {}", message));
                    error!(query = %query, panic = %message, "Query cycle panicked");
                }
            }
        }

        let summary = RoundSummary {
            round,
            queries: self.queries.len(),
            succeeded,
            failed,
            new_items,
            duration: started.elapsed(),
        };

        self.stats.rounds_completed += 1;
        self.stats.last_round_at = Some(Utc::now());

        info!(
            round,
            succeeded,
            failed,
            new_items,
            duration_ms = summary.duration.as_millis() as u64,
            "Check round complete"
        );
        summary
    }
}
