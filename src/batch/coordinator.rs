//! Batch coordinator.
//!
//! Requests are grouped by group id and held until a single timer fires
//! `delay` after the first registration of a window. The flush detaches the
//! whole table before any fetch runs, so requests registered while a flush
//! is in progress start a fresh window with its own timer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::executor::{Epoch, FlushCycle, FlushReport};
use super::pending::{BatchHandle, PendingRequest};
use crate::cache::mutex_lock;

const SOURCE: &str = "batch::coordinator";
const METRIC_BATCH_REGISTERED: &str = "readthrough_batch_registered_total";

/// Groups batched requests and schedules their flush.
pub struct BatchCoordinator {
    table: Mutex<BatchTable>,
    delay: Duration,
    cycles: AtomicU64,
}

#[derive(Default)]
struct BatchTable {
    groups: HashMap<String, Vec<PendingRequest>>,
    timer: Option<ArmedTimer>,
    pending: usize,
}

struct ArmedTimer {
    epoch: Epoch,
    handle: JoinHandle<()>,
}

impl BatchCoordinator {
    pub fn new(delay: Duration) -> Self {
        Self {
            table: Mutex::new(BatchTable::default()),
            delay,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Queue `fetch` under `group_id` and return a handle to its outcome.
    ///
    /// The fetch is not started here. It runs when the window's timer fires,
    /// alongside every other request registered in the same window. Outside
    /// a tokio runtime nothing is queued and the handle resolves to
    /// `NoRuntime`.
    pub fn register<T, E, F, Fut>(
        self: &Arc<Self>,
        group_id: &str,
        request_key: &str,
        fetch: F,
    ) -> BatchHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!(
                target_module = SOURCE,
                group_id,
                request_key,
                "Batch request registered outside a tokio runtime"
            );
            return BatchHandle::unscheduled();
        };

        let (request, receiver) = PendingRequest::new(request_key, fetch);
        let mut table = mutex_lock(&self.table, SOURCE, "register");
        table
            .groups
            .entry(group_id.to_string())
            .or_default()
            .push(request);
        table.pending += 1;
        counter!(METRIC_BATCH_REGISTERED).increment(1);

        if table.timer.is_none() {
            let epoch = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
            let coordinator = Arc::clone(self);
            let delay = self.delay;
            let handle = runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                coordinator.fire(epoch).await;
            });
            table.timer = Some(ArmedTimer { epoch, handle });
            debug!(epoch, delay_ms = delay.as_millis() as u64, "Batch timer armed");
        }

        BatchHandle::waiting(receiver, group_id, request_key)
    }

    /// Flush the current window immediately in the caller's task.
    ///
    /// Cancels the armed timer. Returns `None` if nothing was pending.
    pub async fn flush_now(&self) -> Option<FlushReport> {
        let cycle = self.detach(None)?;
        Some(cycle.execute().await)
    }

    /// Requests registered in the current window and not yet detached.
    pub fn pending_requests(&self) -> usize {
        mutex_lock(&self.table, SOURCE, "pending_requests").pending
    }

    pub fn timer_armed(&self) -> bool {
        mutex_lock(&self.table, SOURCE, "timer_armed")
            .timer
            .is_some()
    }

    /// Number of windows opened so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    async fn fire(&self, epoch: Epoch) {
        if let Some(cycle) = self.detach(Some(epoch)) {
            cycle.execute().await;
        }
    }

    /// Take the whole table for one flush.
    ///
    /// A timer only detaches the window it was armed for; a stale timer finds
    /// a different epoch (or none) and leaves the table alone.
    fn detach(&self, fired: Option<Epoch>) -> Option<FlushCycle> {
        let mut table = mutex_lock(&self.table, SOURCE, "detach");
        let armed = table.timer.as_ref().map(|timer| timer.epoch)?;
        if fired.is_some_and(|epoch| epoch != armed) {
            return None;
        }

        if let Some(timer) = table.timer.take()
            && fired.is_none()
        {
            timer.handle.abort();
        }
        table.pending = 0;
        let groups = std::mem::take(&mut table.groups);
        drop(table);

        let cycle = FlushCycle::new(armed, groups);
        debug!(epoch = cycle.epoch(), "Batch window detached");
        Some(cycle)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::batch::BatchError;

    fn coordinator(delay_ms: u64) -> Arc<BatchCoordinator> {
        Arc::new(BatchCoordinator::new(Duration::from_millis(delay_ms)))
    }

    #[tokio::test(start_paused = true)]
    async fn one_timer_per_window() {
        let batches = coordinator(10);
        let a = batches.register("users", "u:1", || async { Ok::<_, String>(1_u32) });
        let b = batches.register("users", "u:2", || async { Ok::<_, String>(2_u32) });
        let c = batches.register("posts", "p:1", || async { Ok::<_, String>(3_u32) });

        assert_eq!(batches.pending_requests(), 3);
        assert!(batches.timer_armed());
        assert_eq!(batches.cycles(), 1);

        let (a, b, c) = tokio::join!(a, b, c);
        assert_eq!((a.ok(), b.ok(), c.ok()), (Some(1), Some(2), Some(3)));
        assert_eq!(batches.pending_requests(), 0);
        assert!(!batches.timer_armed());
        assert_eq!(batches.cycles(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_wait_for_the_timer() {
        let batches = coordinator(10);
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);
        let handle = batches.register("g", "k", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(started.load(Ordering::SeqCst), 0);

        handle.await.expect("resolved");
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_stays_with_its_request() {
        let batches = coordinator(10);
        let ok = batches.register("g", "a", || async { Ok::<u32, String>(1) });
        let failed = batches.register("g", "b", || async { Err::<u32, _>("nope".to_string()) });

        let (ok, failed) = tokio::join!(ok, failed);
        assert_eq!(ok.expect("resolved"), 1);
        assert!(matches!(failed, Err(BatchError::Fetch(message)) if message == "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn registration_during_flush_opens_next_window() {
        let batches = coordinator(10);
        let inner = Arc::clone(&batches);
        let outer = batches.register("g", "outer", move || async move {
            let nested = inner.register("g", "inner", || async { Ok::<u32, String>(2) });
            Ok::<_, String>(nested)
        });

        let nested = outer.await.expect("outer resolved");
        assert!(batches.timer_armed());
        assert_eq!(batches.pending_requests(), 1);

        assert_eq!(nested.await.expect("inner resolved"), 2);
        assert_eq!(batches.cycles(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_cancels_the_timer() {
        let batches = coordinator(50);
        let handle = batches.register("g", "k", || async { Ok::<u32, String>(5) });

        let report = batches.flush_now().await.expect("window was pending");
        assert_eq!(report.resolved, 1);
        assert_eq!(report.epoch, 1);
        assert!(!batches.timer_armed());
        assert_eq!(handle.await.expect("resolved"), 5);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(batches.flush_now().await.is_none());
        assert_eq!(batches.cycles(), 1);
    }

    #[test]
    fn registration_without_runtime_is_rejected() {
        let batches = coordinator(10);
        let handle = batches.register("g", "k", || async { Ok::<u32, String>(1) });

        assert_eq!(batches.pending_requests(), 0);
        assert!(matches!(
            futures::executor::block_on(handle),
            Err(BatchError::NoRuntime)
        ));
    }
}
