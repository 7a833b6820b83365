//! Flush execution.
//!
//! A flush cycle owns every request registered during one window. Groups run
//! concurrently, and so do the requests inside each group; one request's
//! failure or panic never reaches its neighbours.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::pending::{PendingRequest, Settled};

const METRIC_BATCH_FLUSH: &str = "readthrough_batch_flush_total";
const METRIC_BATCH_FLUSH_MS: &str = "readthrough_batch_flush_ms";
const METRIC_BATCH_REQUEST_FAILED: &str = "readthrough_batch_request_failed_total";

/// Monotonic cycle number, assigned when a window's timer is armed.
pub type Epoch = u64;

/// Requests detached from the coordinator for one flush.
pub(crate) struct FlushCycle {
    epoch: Epoch,
    groups: HashMap<String, Vec<PendingRequest>>,
}

/// Outcome counts of one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub epoch: Epoch,
    pub groups: usize,
    pub resolved: usize,
    pub rejected: usize,
    /// Requests whose fetch panicked; their callers see `Abandoned`.
    pub abandoned: usize,
    /// Requests that settled after the caller dropped its handle.
    pub unobserved: usize,
}

impl FlushReport {
    pub fn requests(&self) -> usize {
        self.resolved + self.rejected + self.abandoned + self.unobserved
    }

    fn record(&mut self, outcome: Option<Settled>) {
        match outcome {
            Some(Settled::Resolved) => self.resolved += 1,
            Some(Settled::Rejected) => self.rejected += 1,
            Some(Settled::Unobserved) => self.unobserved += 1,
            None => self.abandoned += 1,
        }
    }
}

impl FlushCycle {
    pub(crate) fn new(epoch: Epoch, groups: HashMap<String, Vec<PendingRequest>>) -> Self {
        Self { epoch, groups }
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Run every detached request to completion and deliver each outcome to
    /// its own caller.
    #[instrument(level = "debug", skip_all, fields(epoch = self.epoch))]
    pub(crate) async fn execute(self) -> FlushReport {
        let started = Instant::now();
        let mut report = FlushReport {
            epoch: self.epoch,
            groups: self.groups.len(),
            ..FlushReport::default()
        };

        let groups = self
            .groups
            .into_iter()
            .map(|(group_id, requests)| run_group(group_id, requests));
        for outcome in join_all(groups).await.into_iter().flatten() {
            report.record(outcome);
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        counter!(METRIC_BATCH_FLUSH).increment(1);
        histogram!(METRIC_BATCH_FLUSH_MS).record(elapsed_ms);
        let failed = report.rejected + report.abandoned;
        if failed > 0 {
            counter!(METRIC_BATCH_REQUEST_FAILED).increment(failed as u64);
        }

        debug!(
            groups = report.groups,
            resolved = report.resolved,
            rejected = report.rejected,
            abandoned = report.abandoned,
            unobserved = report.unobserved,
            elapsed_ms,
            "Batch flush completed"
        );
        report
    }
}

/// `None` marks a request whose fetch panicked.
async fn run_group(group_id: String, requests: Vec<PendingRequest>) -> Vec<Option<Settled>> {
    let group = group_id.as_str();
    let runs = requests.into_iter().map(|request| {
        let request_key = request.request_key().to_string();
        async move {
            match AssertUnwindSafe(request.execute()).catch_unwind().await {
                Ok(settled) => Some(settled),
                Err(_) => {
                    warn!(
                        group_id = group,
                        request_key = request_key.as_str(),
                        "Batched fetch panicked; request abandoned"
                    );
                    None
                }
            }
        }
    });
    join_all(runs).await
}
