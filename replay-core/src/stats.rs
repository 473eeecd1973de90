use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;

/// Per-operation duration above which a query counts as slow.
pub const QUERY_SLOW_THRESHOLD: Duration = Duration::from_secs(5);

/// Per-operation duration above which an ingestion batch counts as slow.
pub const INGESTION_SLOW_THRESHOLD: Duration = Duration::from_secs(1);

/// One point-in-time resource reading for a single running container
/// (or the whole host when container-level sampling is unavailable).
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerUsage {
    pub name: String,
    pub cpu_percent: f64,
    pub mem_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    /// Offset from the start of the sampling window.
    pub at: Duration,
    pub containers: Vec<ContainerUsage>,
}

/// Counters and samples for one load activity (queries or ingestions).
///
/// Exactly one worker loop writes each instance; counters are monotonic and
/// the timing/error collections are append-only. The orchestrator reads only
/// after all workers joined, so a plain `Mutex` around the collections is
/// uncontended in practice.
#[derive(Debug, Default)]
pub struct ActivityStats {
    total: AtomicU64,
    failed: AtomicU64,
    slow: AtomicU64,
    timings: Mutex<Vec<Duration>>,
    errors: Mutex<BTreeMap<String, Vec<String>>>,
}

impl ActivityStats {
    /// Record one completed operation. Every operation is timed, including
    /// failed ones, so `timings.len() == total` holds for the whole run.
    pub fn record(&self, elapsed: Duration, slow_threshold: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if elapsed > slow_threshold {
            self.slow.fetch_add(1, Ordering::Relaxed);
        }
        self.timings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(elapsed);
    }

    /// Record one failed operation: the normalized error message keys a list
    /// of occurrence contexts (e.g. the query or connection name).
    pub fn record_failure(&self, message: &str, context: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(message.to_string())
            .or_default()
            .push(context.to_string());
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn slow(&self) -> u64 {
        self.slow.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> ActivitySnapshot {
        ActivitySnapshot {
            total: self.total(),
            failed: self.failed(),
            slow: self.slow(),
            timings: self
                .timings
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            errors: self
                .errors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
        }
    }
}

/// Statistics shared across the workers of one replay run.
///
/// Ownership is statically partitioned: the query worker writes `queries`,
/// the ingestion workers write `ingestions`, the sampler writes `docker`,
/// and the orchestrator writes the remaining fields between phases.
#[derive(Debug, Default)]
pub struct RunStats {
    pub queries: ActivityStats,
    pub ingestions: ActivityStats,
    object_creation: Mutex<Option<Duration>>,
    initial_data: Mutex<Option<InitialDataSnapshot>>,
    docker: Mutex<Vec<ResourceSample>>,
}

impl RunStats {
    pub fn add_object_creation_time(&self, elapsed: Duration) {
        let mut slot = self
            .object_creation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(slot.unwrap_or(Duration::ZERO) + elapsed);
    }

    /// Record the bulk-load step. Only called when data was actually created;
    /// the absence of the entry in the snapshot means no bulk load happened.
    pub fn set_initial_data(&self, docker: Vec<ResourceSample>, time: Duration) {
        *self
            .initial_data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some(InitialDataSnapshot { docker, time });
    }

    pub fn push_resource_sample(&self, sample: ResourceSample) {
        self.docker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sample);
    }

    /// Produce the plain, immutable record handed to printing and diffing.
    pub fn finalize(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.queries.snapshot(),
            ingestions: self.ingestions.snapshot(),
            object_creation: *self
                .object_creation
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            initial_data: self
                .initial_data
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            docker: self
                .docker
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivitySnapshot {
    pub total: u64,
    pub failed: u64,
    pub slow: u64,
    pub timings: Vec<Duration>,
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ActivitySnapshot {
    /// Latency percentiles in milliseconds: (p50, p90, p99, max).
    pub fn latency_percentiles_ms(&self) -> Option<(u64, u64, u64, u64)> {
        if self.timings.is_empty() {
            return None;
        }

        // Track up to 10min in microseconds (with 3 sigfigs).
        let mut hist = Histogram::<u64>::new_with_bounds(1, 600_000_000, 3).ok()?;
        for d in &self.timings {
            hist.saturating_record(d.as_micros().min(u64::MAX as u128) as u64);
        }
        Some((
            hist.value_at_quantile(0.50) / 1_000,
            hist.value_at_quantile(0.90) / 1_000,
            hist.value_at_quantile(0.99) / 1_000,
            hist.max() / 1_000,
        ))
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitialDataSnapshot {
    pub docker: Vec<ResourceSample>,
    pub time: Duration,
}

/// The aggregated statistics record produced by one replay run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub queries: ActivitySnapshot,
    pub ingestions: ActivitySnapshot,
    pub object_creation: Option<Duration>,
    pub initial_data: Option<InitialDataSnapshot>,
    pub docker: Vec<ResourceSample>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn record_keeps_failed_below_total_and_times_everything() {
        let stats = ActivityStats::default();
        for i in 0..10u64 {
            let elapsed = Duration::from_millis(100 * (i + 1));
            stats.record(elapsed, Duration::from_millis(650));
            if i % 3 == 0 {
                stats.record_failure("boom", &format!("query-{i}"));
            }
        }

        let snap = stats.snapshot();
        assert_eq!(snap.total, 10);
        assert_eq!(snap.failed, 4);
        assert!(snap.failed <= snap.total);
        assert_eq!(snap.timings.len(), snap.total as usize);
        // 700ms..1000ms exceed the threshold.
        assert_eq!(snap.slow, 4);
        assert_eq!(snap.errors["boom"].len(), 4);
    }

    #[test]
    fn counters_never_decrease() {
        let stats = ActivityStats::default();
        let mut last = (0, 0, 0);
        for _ in 0..100 {
            stats.record(Duration::from_millis(10), QUERY_SLOW_THRESHOLD);
            let now = (stats.total(), stats.failed(), stats.slow());
            assert!(now.0 >= last.0 && now.1 >= last.1 && now.2 >= last.2);
            last = now;
        }
    }

    #[test]
    fn initial_data_absent_unless_recorded() {
        let stats = RunStats::default();
        assert!(stats.finalize().initial_data.is_none());
        stats.set_initial_data(Vec::new(), Duration::from_secs(3));
        let snap = stats.finalize();
        assert_eq!(
            snap.initial_data,
            Some(InitialDataSnapshot {
                docker: Vec::new(),
                time: Duration::from_secs(3)
            })
        );
    }

    #[test]
    fn percentiles_from_timings() {
        let mut snap = ActivitySnapshot::default();
        assert!(snap.latency_percentiles_ms().is_none());
        snap.timings = (1..=100).map(Duration::from_millis).collect();
        let (p50, p90, p99, max) = snap.latency_percentiles_ms().unwrap();
        assert!((49..=51).contains(&p50));
        assert!((89..=91).contains(&p90));
        assert!((98..=100).contains(&p99));
        assert!((99..=100).contains(&max));
    }
}
