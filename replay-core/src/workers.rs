use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::rngs::StdRng;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::cancel::CancelSignal;
use crate::client::{IngestionDriver, QueryDriver, ResourceMonitor};
use crate::error::{Error, Result};
use crate::stats::{
    INGESTION_SLOW_THRESHOLD, QUERY_SLOW_THRESHOLD, ResourceSample, RunStats,
};
use crate::workload::QueryDef;

/// Base pacing for one ingestion batch at factor 1.0.
const INGESTION_PACE: Duration = Duration::from_secs(1);

/// Base pacing between query submissions at factor 1.0.
const QUERY_PACE: Duration = Duration::from_millis(100);

/// How often the resource sampler takes a snapshot.
pub const RESOURCE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// A set of concurrently-running worker activities driven by one shared
/// cancel signal. Join is unconditional: every handle is awaited even when an
/// earlier one failed, and only then is the first error re-raised, so no
/// background activity outlives the pool.
#[derive(Default)]
pub struct WorkerPool {
    handles: Vec<(String, JoinHandle<Result<()>>)>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: &str, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.handles.push((name.to_string(), tokio::spawn(future)));
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Join every worker, then surface the first fatal error (if any).
    pub async fn join_all(self) -> Result<()> {
        let mut first_err: Option<Error> = None;
        for (name, handle) in self.handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(Error::Join(join_err)),
            };
            if let Err(err) = result
                && first_err.is_none()
            {
                first_err = Some(Error::Worker {
                    name,
                    message: err.to_string(),
                });
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Continuous-ingestion loop for one connection: produce a batch, record its
/// timing, pace, repeat until cancelled. A failed batch is counted and the
/// loop continues; only the loop itself failing is fatal.
pub async fn ingestion_worker(
    driver: Arc<dyn IngestionDriver>,
    cancel: Arc<CancelSignal>,
    stats: Arc<RunStats>,
    factor: f64,
    verbose: bool,
) -> Result<()> {
    let pause = scale_pace(INGESTION_PACE, factor);
    while !cancel.is_set() {
        let started = Instant::now();
        if let Err(err) = driver.ingest().await {
            stats
                .ingestions
                .record_failure(&err.to_string(), driver.name());
            if verbose {
                println!("  Ingestion into {} failed: {err}", driver.name());
            }
        }
        stats
            .ingestions
            .record(started.elapsed(), INGESTION_SLOW_THRESHOLD);
        // Pace against the cancel signal so stop latency stays one operation.
        if cancel.wait_timeout(pause).await {
            break;
        }
    }
    Ok(())
}

/// Continuous-query loop: draw queries with a deterministic RNG, keep at most
/// `max_concurrent` in flight, record per-query stats, drain in-flight work
/// after cancellation.
pub async fn query_worker(
    driver: Arc<dyn QueryDriver>,
    queries: Arc<Vec<QueryDef>>,
    cancel: Arc<CancelSignal>,
    stats: Arc<RunStats>,
    factor: f64,
    verbose: bool,
    mut rng: StdRng,
    max_concurrent: usize,
) -> Result<()> {
    let pause = scale_pace(QUERY_PACE, factor);
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut inflight: JoinSet<()> = JoinSet::new();

    while !cancel.is_set() {
        // Reap finished queries; a panicked query task is fatal to the loop.
        while let Some(joined) = inflight.try_join_next() {
            joined?;
        }

        let permit = tokio::select! {
            () = cancel.wait() => break,
            permit = semaphore.clone().acquire_owned() => {
                permit.map_err(|err| Error::Worker {
                    name: "queries".to_string(),
                    message: err.to_string(),
                })?
            }
        };

        let query = queries[rng.gen_range(0..queries.len())].clone();
        let driver = driver.clone();
        let stats = stats.clone();
        inflight.spawn(async move {
            let started = Instant::now();
            if let Err(err) = driver.execute(&query).await {
                stats.queries.record_failure(&err.to_string(), &query.name);
                if verbose {
                    println!("  Query {} failed: {err}", query.name);
                }
            }
            stats.queries.record(started.elapsed(), QUERY_SLOW_THRESHOLD);
            drop(permit);
        });

        if cancel.wait_timeout(pause).await {
            break;
        }
    }

    // Queries already submitted still count towards the run.
    while let Some(joined) = inflight.join_next().await {
        joined?;
    }
    Ok(())
}

/// Take resource snapshots at a fixed cadence until cancelled, returning the
/// collected sequence. Timestamps are offsets from the sampling start.
pub async fn collect_resource_samples(
    monitor: Arc<dyn ResourceMonitor>,
    cancel: Arc<CancelSignal>,
    cadence: Duration,
) -> Result<Vec<ResourceSample>> {
    let started = Instant::now();
    let mut samples = Vec::new();
    while !cancel.is_set() {
        let containers = monitor.sample().await?;
        samples.push(ResourceSample {
            at: started.elapsed(),
            containers,
        });
        if cancel.wait_timeout(cadence).await {
            break;
        }
    }
    Ok(samples)
}

fn scale_pace(base: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return base;
    }
    Duration::from_secs_f64(base.as_secs_f64() / factor)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::client::ClientError;
    use rand::SeedableRng;

    struct CountingIngestion {
        calls: AtomicU64,
        fail_every: u64,
    }

    #[async_trait]
    impl IngestionDriver for CountingIngestion {
        fn name(&self) -> &str {
            "pg-orders"
        }

        async fn ingest(&self) -> std::result::Result<(), ClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every != 0 && call % self.fail_every == 0 {
                return Err(ClientError::new("connection reset"));
            }
            Ok(())
        }
    }

    struct OkQueries;

    #[async_trait]
    impl QueryDriver for OkQueries {
        async fn execute(&self, _query: &QueryDef) -> std::result::Result<(), ClientError> {
            Ok(())
        }
    }

    fn queries(n: usize) -> Arc<Vec<QueryDef>> {
        Arc::new(
            (0..n)
                .map(|i| QueryDef {
                    name: format!("q{i}"),
                    sql: format!("SELECT {i}"),
                })
                .collect(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ingestion_worker_counts_failures_without_aborting() {
        let driver = Arc::new(CountingIngestion {
            calls: AtomicU64::new(0),
            fail_every: 3,
        });
        let cancel = Arc::new(CancelSignal::new());
        let stats = Arc::new(RunStats::default());

        let mut pool = WorkerPool::new();
        pool.spawn(
            "ingestions",
            ingestion_worker(driver.clone(), cancel.clone(), stats.clone(), 1.0, false),
        );

        cancel.wait_timeout(Duration::from_secs(9)).await;
        cancel.set();
        pool.join_all().await.unwrap();

        let snap = stats.finalize();
        assert!(snap.ingestions.total >= 9);
        assert!(snap.ingestions.failed >= 2);
        assert!(snap.ingestions.failed <= snap.ingestions.total);
        assert_eq!(snap.ingestions.timings.len(), snap.ingestions.total as usize);
        assert!(snap.ingestions.errors.contains_key("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn query_worker_records_draws_deterministically() {
        let cancel = Arc::new(CancelSignal::new());
        let stats = Arc::new(RunStats::default());

        let mut pool = WorkerPool::new();
        pool.spawn(
            "queries",
            query_worker(
                Arc::new(OkQueries),
                queries(4),
                cancel.clone(),
                stats.clone(),
                1.0,
                false,
                StdRng::seed_from_u64(42),
                8,
            ),
        );

        cancel.wait_timeout(Duration::from_secs(2)).await;
        cancel.set();
        pool.join_all().await.unwrap();

        let snap = stats.finalize();
        assert!(snap.queries.total >= 10);
        assert_eq!(snap.queries.failed, 0);
        assert_eq!(snap.queries.timings.len(), snap.queries.total as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_worker_surfaces_after_sibling_joined() {
        let cancel = Arc::new(CancelSignal::new());
        let sibling_joined = Arc::new(AtomicU64::new(0));

        let mut pool = WorkerPool::new();
        pool.spawn("bad", async move {
            Err(Error::Worker {
                name: "inner".to_string(),
                message: "control loop raised".to_string(),
            })
        });
        let sibling_cancel = cancel.clone();
        let joined_flag = sibling_joined.clone();
        pool.spawn("sibling", async move {
            sibling_cancel.wait().await;
            joined_flag.store(1, Ordering::SeqCst);
            Ok(())
        });

        // The sibling is still running when "bad" fails; it must be joined,
        // not abandoned, before the error is re-raised.
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.set();
        let err = pool.join_all().await.unwrap_err();
        assert_eq!(sibling_joined.load(Ordering::SeqCst), 1);
        match err {
            Error::Worker { name, .. } => assert_eq!(name, "bad"),
            other => panic!("unexpected error: {other}"),
        }
    }

    struct StaticMonitor;

    #[async_trait]
    impl ResourceMonitor for StaticMonitor {
        async fn sample(&self) -> std::result::Result<Vec<crate::stats::ContainerUsage>, ClientError> {
            Ok(vec![crate::stats::ContainerUsage {
                name: "materialized".to_string(),
                cpu_percent: 12.5,
                mem_bytes: 1 << 30,
            }])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_collects_until_cancelled() {
        let cancel = Arc::new(CancelSignal::new());
        let handle = tokio::spawn(collect_resource_samples(
            Arc::new(StaticMonitor),
            cancel.clone(),
            RESOURCE_SAMPLE_INTERVAL,
        ));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.set();
        let samples = handle.await.unwrap().unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].containers[0].name, "materialized");
    }
}
