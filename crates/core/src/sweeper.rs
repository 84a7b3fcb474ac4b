//! Periodic enforcement of time-based transitions.
//!
//! The sweeper never writes on its own; each candidate goes through the same
//! [`LifecycleEngine`] function an API caller would use. Candidates are picked
//! by their current status, so a row another writer already moved is simply
//! not selected on the next pass.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SweeperConfig;
use crate::errors::LifecycleError;
use crate::lifecycle::LifecycleEngine;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub quotes_expired: u32,
    pub requests_unmatched: u32,
    pub requests_expired: u32,
    /// Candidates that another writer moved first.
    pub skipped: u32,
    pub failed: u32,
}

impl SweepReport {
    pub fn transitions(&self) -> u32 {
        self.quotes_expired + self.requests_unmatched + self.requests_expired
    }

    fn tally(&mut self, result: Result<(), LifecycleError>, counter: fn(&mut Self) -> &mut u32) {
        match result {
            Ok(()) => *counter(self) += 1,
            // Lost a race or the row is no longer due; the next pass re-selects.
            Err(
                LifecycleError::InvalidState { .. }
                | LifecycleError::Conflict(_)
                | LifecycleError::Validation(_)
                | LifecycleError::Expired { .. },
            ) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Clone)]
pub struct ExpirySweeper {
    engine: LifecycleEngine,
    interval: Duration,
    batch_size: u32,
}

impl ExpirySweeper {
    pub fn new(engine: LifecycleEngine, config: &SweeperConfig) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            batch_size: config.batch_size.max(1),
        }
    }

    /// One pass: expire due quotes, mark unmatched requests, expire stale
    /// requests. A single row's failure is logged and counted.
    pub async fn sweep_once(&self) -> Result<SweepReport, LifecycleError> {
        let mut report = SweepReport::default();

        for quote_id in self.engine.due_quotes(self.batch_size).await? {
            let result = self.engine.expire_quote(&quote_id).await.map(|_| ());
            if let Err(error) = &result {
                log_row_failure("quote", &quote_id.0, error);
            }
            report.tally(result, |report| &mut report.quotes_expired);
        }

        for request_id in self.engine.unmatched_candidates(self.batch_size).await? {
            let result = self.engine.mark_unmatched(&request_id).await.map(|_| ());
            if let Err(error) = &result {
                log_row_failure("request", &request_id.0, error);
            }
            report.tally(result, |report| &mut report.requests_unmatched);
        }

        for request_id in self.engine.stale_requests(self.batch_size).await? {
            let result = self.engine.expire_request(&request_id).await.map(|_| ());
            if let Err(error) = &result {
                log_row_failure("request", &request_id.0, error);
            }
            report.tally(result, |report| &mut report.requests_expired);
        }

        if report.transitions() > 0 || report.failed > 0 {
            info!(
                event_name = "sweeper.pass.completed",
                quotes_expired = report.quotes_expired,
                requests_unmatched = report.requests_unmatched,
                requests_expired = report.requests_expired,
                skipped = report.skipped,
                failed = report.failed,
                "sweeper pass completed"
            );
        } else {
            debug!(event_name = "sweeper.pass.idle", skipped = report.skipped, "nothing to sweep");
        }

        Ok(report)
    }

    /// Sweeps on a fixed interval until `shutdown` flips to `true` or its
    /// sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            event_name = "sweeper.started",
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "expiry sweeper started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        warn!(
                            event_name = "sweeper.pass.failed",
                            error = %error,
                            "sweeper pass could not list candidates"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(event_name = "sweeper.stopped", "expiry sweeper stopped");
    }
}

fn log_row_failure(entity: &'static str, id: &str, error: &LifecycleError) {
    warn!(
        event_name = "sweeper.row.failed",
        entity,
        id,
        error_kind = error.kind(),
        error = %error,
        "sweeper could not transition row"
    );
}
