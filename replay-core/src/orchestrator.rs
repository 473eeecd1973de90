use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::Instant;

use crate::cancel::CancelSignal;
use crate::client::{
    BulkLoader, IngestionDriver, IntrospectionSource, ObjectCreator, QueryDriver, ResourceMonitor,
    ServiceManager,
};
use crate::error::Result;
use crate::poller::{ConvergencePoller, PollerConfig};
use crate::stats::{RunStats, StatsSnapshot};
use crate::workers::{
    RESOURCE_SAMPLE_INTERVAL, WorkerPool, collect_resource_samples, ingestion_worker, query_worker,
};
use crate::workload::WorkloadSpec;

/// Child RNGs are reseeded from this bounded range so that reference and
/// candidate benchmark runs draw independent-but-reproducible sequences.
pub const SEED_RANGE: u64 = 1_000_000;

/// Knobs for one replay run. The CLI maps its flags onto this.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub factor_initial_data: f64,
    pub factor_ingestions: f64,
    pub factor_queries: f64,
    pub runtime: Duration,
    pub verbose: bool,
    pub create_objects: bool,
    pub initial_data: bool,
    pub early_initial_data: bool,
    pub run_ingestions: bool,
    pub run_queries: bool,
    pub max_concurrent_queries: usize,
    pub poller: PollerConfig,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            factor_initial_data: 1.0,
            factor_ingestions: 1.0,
            factor_queries: 1.0,
            runtime: Duration::from_secs(600),
            verbose: false,
            create_objects: true,
            initial_data: true,
            early_initial_data: false,
            run_ingestions: true,
            run_queries: true,
            max_concurrent_queries: 100,
            poller: PollerConfig::default(),
        }
    }
}

/// Drives one workload run end to end:
/// `(object_creation?) -> (initial_data?) -> await_hydration ->
/// await_freshness -> (worker phase | skip)`, returning the aggregated
/// statistics record.
pub struct Replay {
    pub introspection: Arc<dyn IntrospectionSource>,
    pub objects: Arc<dyn ObjectCreator>,
    pub loader: Arc<dyn BulkLoader>,
    pub ingestions: Vec<Arc<dyn IngestionDriver>>,
    pub queries: Arc<dyn QueryDriver>,
    pub monitor: Arc<dyn ResourceMonitor>,
    pub services: Arc<dyn ServiceManager>,
}

impl Replay {
    pub async fn run(
        &self,
        workload: &WorkloadSpec,
        opts: &ReplayOptions,
        rng: &mut StdRng,
    ) -> Result<StatsSnapshot> {
        // Connection-type validation happens before any service is touched.
        let services: Vec<String> = workload.required_services()?.into_iter().collect();
        println!("Required services for connections: {services:?}");
        self.services.ensure_up(&services).await?;

        let stats = Arc::new(RunStats::default());

        if opts.create_objects {
            println!("Creating objects");
            let started = Instant::now();
            self.objects.create_part_one(workload, opts.verbose).await?;
            if !opts.early_initial_data {
                self.objects.create_part_two(workload, opts.verbose).await?;
            }
            stats.add_object_creation_time(started.elapsed());
        }

        if opts.initial_data {
            self.run_initial_data(workload, opts, rng, &stats).await?;
        } else if opts.early_initial_data {
            // Bulk load was skipped, but the deferred objects still have to
            // be created.
            let started = Instant::now();
            self.objects.create_part_two(workload, opts.verbose).await?;
            stats.add_object_creation_time(started.elapsed());
        }

        // Always gate on convergence, even when nothing was created: a prior
        // cluster state may still be catching up.
        let poller = ConvergencePoller::new(self.introspection.as_ref(), opts.poller.clone());
        poller.await_hydration().await?;
        poller.await_freshness().await?;

        self.run_worker_phase(workload, opts, rng, &stats).await?;

        Ok(stats.finalize())
    }

    /// Bulk load with a resource sampler scoped to exactly this step. The
    /// sampler gets its own cancel signal and is joined unconditionally, even
    /// when loading fails.
    async fn run_initial_data(
        &self,
        workload: &WorkloadSpec,
        opts: &ReplayOptions,
        rng: &mut StdRng,
        stats: &Arc<RunStats>,
    ) -> Result<()> {
        println!("Creating initial data");
        let sampler_cancel = Arc::new(CancelSignal::new());
        let sampler = tokio::spawn(collect_resource_samples(
            self.monitor.clone(),
            sampler_cancel.clone(),
            RESOURCE_SAMPLE_INTERVAL,
        ));

        let started = Instant::now();
        let loaded = async {
            let mut created = self
                .loader
                .load_external(workload, opts.factor_initial_data, &mut child_rng(rng))
                .await?;
            if opts.early_initial_data {
                let obj_started = Instant::now();
                self.objects.create_part_two(workload, opts.verbose).await?;
                stats.add_object_creation_time(obj_started.elapsed());
            }
            created |= self
                .loader
                .load_requiring_target(workload, opts.factor_initial_data, &mut child_rng(rng))
                .await?;
            Ok::<bool, crate::error::Error>(created)
        }
        .await;
        let elapsed = started.elapsed();

        sampler_cancel.set();
        let samples = sampler.await??;

        // Only record the step if data was actually created; the entry's
        // presence in the final record means "bulk load happened".
        if loaded? {
            stats.set_initial_data(samples, elapsed);
        }
        Ok(())
    }

    async fn run_worker_phase(
        &self,
        workload: &WorkloadSpec,
        opts: &ReplayOptions,
        rng: &mut StdRng,
        stats: &Arc<RunStats>,
    ) -> Result<()> {
        let cancel = Arc::new(CancelSignal::new());
        let mut pool = WorkerPool::new();

        if opts.run_ingestions && !self.ingestions.is_empty() {
            println!("Starting continuous ingestions");
            for driver in &self.ingestions {
                pool.spawn(
                    &format!("ingestion-{}", driver.name()),
                    ingestion_worker(
                        driver.clone(),
                        cancel.clone(),
                        stats.clone(),
                        opts.factor_ingestions,
                        opts.verbose,
                    ),
                );
            }
        }

        if opts.run_queries && !workload.queries.is_empty() {
            println!("Starting continuous queries");
            pool.spawn(
                "queries",
                query_worker(
                    self.queries.clone(),
                    Arc::new(workload.queries.clone()),
                    cancel.clone(),
                    stats.clone(),
                    opts.factor_queries,
                    opts.verbose,
                    StdRng::seed_from_u64(rng.gen_range(0..SEED_RANGE)),
                    opts.max_concurrent_queries,
                ),
            );
        }

        if pool.is_empty() {
            println!("No continuous ingestions or queries defined, skipping phase");
            return Ok(());
        }

        // The sampler rides along whenever any other worker runs; the
        // comparison needs resource data for the whole window.
        let monitor = self.monitor.clone();
        let sampler_cancel = cancel.clone();
        let sampler_stats = stats.clone();
        pool.spawn("docker-stats", async move {
            let samples =
                collect_resource_samples(monitor, sampler_cancel, RESOURCE_SAMPLE_INTERVAL).await?;
            for sample in samples {
                sampler_stats.push_resource_sample(sample);
            }
            Ok(())
        });

        cancel.wait_timeout(opts.runtime).await;
        cancel.set();
        pool.join_all().await
    }
}

fn child_rng(rng: &mut StdRng) -> StdRng {
    StdRng::seed_from_u64(rng.gen_range(0..SEED_RANGE))
}
