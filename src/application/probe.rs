//! Synthetic workload that exercises every engine path against a simulated
//! backend and summarises what happened.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::batch::BatchError;
use crate::cache::{CacheStats, PageRequest};
use crate::config::ProbeArgs;
use crate::engine::QueryEngine;

use crate::infra::error::InfraError;

use super::error::AppError;

const RECORD_PREFIX: &str = "record:";
const PAGE_KEY: &str = "records";
const PAGE_LIMIT: u32 = 10;
const PAGES: u32 = 3;

/// Shape of one probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePlan {
    pub requests: u32,
    pub groups: u32,
    pub latency: Duration,
    /// Every Nth batched fetch fails; 0 disables failures.
    pub fail_every: u32,
}

impl From<&ProbeArgs> for ProbePlan {
    fn from(args: &ProbeArgs) -> Self {
        Self {
            requests: args.requests,
            groups: args.groups,
            latency: Duration::from_millis(args.latency_ms),
            fail_every: args.fail_every,
        }
    }
}

impl ProbePlan {
    fn validate(&self) -> Result<(), AppError> {
        if self.requests == 0 {
            return Err(AppError::validation("probe needs at least one request"));
        }
        if self.groups == 0 {
            return Err(AppError::validation("probe needs at least one batch group"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("simulated backend failure loading record {id}")]
pub struct BackendError {
    pub id: u64,
}

/// Backend stand-in with fixed latency and a fetch counter.
#[derive(Debug)]
pub struct SimulatedBackend {
    latency: Duration,
    fail_every: u32,
    fetches: AtomicU64,
}

impl SimulatedBackend {
    pub fn new(latency: Duration, fail_every: u32) -> Self {
        Self {
            latency,
            fail_every,
            fetches: AtomicU64::new(0),
        }
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub async fn load(&self, id: u64) -> Result<Record, BackendError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        Ok(Record {
            id,
            name: format!("record-{id}"),
        })
    }

    /// `load`, failing every `fail_every`th id.
    pub async fn load_flaky(&self, id: u64) -> Result<Record, BackendError> {
        let record = self.load(id).await?;
        if self.fail_every > 0 && (id + 1) % u64::from(self.fail_every) == 0 {
            return Err(BackendError { id });
        }
        Ok(record)
    }

    pub async fn page(&self, offset: u64, limit: u32) -> Result<Vec<Record>, BackendError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        Ok((offset..offset + u64::from(limit))
            .map(|id| Record {
                id,
                name: format!("record-{id}"),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CachedPhase {
    pub reads: u64,
    pub fetches: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchedPhase {
    pub requests: u64,
    pub groups: u32,
    pub resolved: u64,
    pub rejected: u64,
    pub abandoned: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PagedPhase {
    pub reads: u64,
    pub fetches: u64,
    pub rows: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeSummary {
    pub cached: CachedPhase,
    pub batched: BatchedPhase,
    pub paged: PagedPhase,
    pub stats: CacheStats,
    pub cleared: usize,
    pub stats_after_clear: CacheStats,
    pub elapsed_ms: f64,
}

/// Run the workload: every key read twice through the cache, every key
/// batched once across `groups`, a few pages read twice, then a cleanup of
/// the per-record keys.
#[instrument(level = "debug", skip_all, fields(requests = plan.requests, groups = plan.groups))]
pub async fn run(engine: &QueryEngine, plan: ProbePlan) -> Result<ProbeSummary, AppError> {
    plan.validate()?;
    let started = Instant::now();
    let backend = Arc::new(SimulatedBackend::new(plan.latency, plan.fail_every));

    let cached = cached_phase(engine, &backend, plan.requests).await;
    let batched = batched_phase(engine, &backend, plan).await;
    let paged = paged_phase(engine, &backend).await;

    let stats = engine.cache_stats();
    let cleared = engine.clear_cache(Some(RECORD_PREFIX));
    let stats_after_clear = engine.cache_stats();

    let summary = ProbeSummary {
        cached,
        batched,
        paged,
        stats,
        cleared,
        stats_after_clear,
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
    };
    info!(
        entries = summary.stats.size,
        memory_usage = summary.stats.memory_usage,
        batched_rejected = summary.batched.rejected,
        cleared = summary.cleared,
        "Probe finished"
    );
    Ok(summary)
}

/// Write the summary as pretty JSON followed by a newline.
pub fn write_summary<W: Write>(out: &mut W, summary: &ProbeSummary) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(summary).map_err(InfraError::from)?;
    writeln!(out, "{rendered}").map_err(InfraError::from)?;
    out.flush().map_err(InfraError::from)?;
    Ok(())
}

async fn cached_phase(
    engine: &QueryEngine,
    backend: &Arc<SimulatedBackend>,
    requests: u32,
) -> CachedPhase {
    let before = backend.fetches();
    let mut phase = CachedPhase::default();

    for _round in 0..2 {
        let reads = (0..u64::from(requests)).map(|id| {
            let backend = Arc::clone(backend);
            let key = format!("{RECORD_PREFIX}{id}");
            async move {
                engine
                    .cached_query_default(&key, move || async move { backend.load(id).await })
                    .await
            }
        });
        for outcome in join_all(reads).await {
            phase.reads += 1;
            if outcome.is_err() {
                phase.failures += 1;
            }
        }
    }

    phase.fetches = backend.fetches() - before;
    debug!(reads = phase.reads, fetches = phase.fetches, "Cached phase done");
    phase
}

async fn batched_phase(
    engine: &QueryEngine,
    backend: &Arc<SimulatedBackend>,
    plan: ProbePlan,
) -> BatchedPhase {
    let handles: Vec<_> = (0..u64::from(plan.requests))
        .map(|id| {
            let backend = Arc::clone(backend);
            let group = format!("group:{}", id % u64::from(plan.groups));
            let key = format!("{RECORD_PREFIX}{id}");
            engine.batch_query(&group, &key, move || async move { backend.load_flaky(id).await })
        })
        .collect();

    let mut phase = BatchedPhase {
        groups: plan.groups,
        ..BatchedPhase::default()
    };
    for outcome in join_all(handles).await {
        phase.requests += 1;
        match outcome {
            Ok(_) => phase.resolved += 1,
            Err(BatchError::Fetch(_)) => phase.rejected += 1,
            Err(_) => phase.abandoned += 1,
        }
    }

    debug!(
        resolved = phase.resolved,
        rejected = phase.rejected,
        "Batched phase done"
    );
    phase
}

async fn paged_phase(engine: &QueryEngine, backend: &Arc<SimulatedBackend>) -> PagedPhase {
    let before = backend.fetches();
    let mut phase = PagedPhase::default();

    for _round in 0..2 {
        for page in 1..=PAGES {
            let backend = Arc::clone(backend);
            let result = engine
                .paginated_query(
                    PAGE_KEY,
                    move |offset, limit| async move { backend.page(offset, limit).await },
                    PageRequest::new(page, PAGE_LIMIT),
                )
                .await;
            phase.reads += 1;
            if let Ok(paginated) = result {
                phase.rows += paginated.data.len() as u64;
            }
        }
    }

    phase.fetches = backend.fetches() - before;
    phase
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    fn plan(requests: u32, groups: u32, fail_every: u32) -> ProbePlan {
        ProbePlan {
            requests,
            groups,
            latency: Duration::from_millis(2),
            fail_every,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_round_is_served_from_cache() {
        let engine = QueryEngine::default();
        let summary = run(&engine, plan(8, 2, 0)).await.expect("probe runs");

        assert_eq!(summary.cached.reads, 16);
        assert_eq!(summary.cached.fetches, 8);
        assert_eq!(summary.paged.reads, 6);
        assert_eq!(summary.paged.fetches, 3);
        assert_eq!(summary.paged.rows, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn injected_failures_stay_with_their_requests() {
        let engine = QueryEngine::default();
        let summary = run(&engine, plan(10, 3, 5)).await.expect("probe runs");

        assert_eq!(
            summary.batched,
            BatchedPhase {
                requests: 10,
                groups: 3,
                resolved: 8,
                rejected: 2,
                abandoned: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_removes_only_record_keys() {
        let engine = QueryEngine::new(CacheConfig::default().with_single_flight(true));
        let summary = run(&engine, plan(4, 1, 0)).await.expect("probe runs");

        assert_eq!(summary.stats.size, 4 + PAGES as usize);
        assert_eq!(summary.cleared, 4);
        assert_eq!(summary.stats_after_clear.size, PAGES as usize);
        assert!(summary.stats_after_clear.memory_usage > 0);
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn summary_is_written_as_json() {
        let engine = QueryEngine::default();
        let summary = run(&engine, plan(2, 1, 0)).await.expect("probe runs");

        let mut out = Vec::new();
        write_summary(&mut out, &summary).expect("summary written");

        let text = String::from_utf8(out).expect("utf-8 output");
        assert!(text.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&text).expect("json output");
        assert_eq!(value["cached"]["reads"], 4);
        assert_eq!(value["cleared"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_output_surfaces_io_error() {
        let engine = QueryEngine::default();
        let summary = run(&engine, plan(1, 1, 0)).await.expect("probe runs");

        let err = write_summary(&mut ClosedPipe, &summary).expect_err("write fails");
        assert!(matches!(err, AppError::Infra(InfraError::Io(_))));
    }

    #[tokio::test]
    async fn empty_plans_are_rejected() {
        let engine = QueryEngine::default();
        assert!(matches!(
            run(&engine, plan(0, 1, 0)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            run(&engine, plan(1, 0, 0)).await,
            Err(AppError::Validation(_))
        ));
    }
}
