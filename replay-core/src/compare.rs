use rand::SeedableRng;
use rand::rngs::StdRng;

use std::sync::Arc;

use crate::client::{DeploymentManager, StatsDiff, StatsRenderer};
use crate::error::{Error, Result};
use crate::orchestrator::{Replay, ReplayOptions};
use crate::stats::StatsSnapshot;
use crate::workload::WorkloadSpec;

/// One structured regression record from the comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail {
    pub message: String,
    pub details: String,
    pub scope: Option<String>,
}

impl std::fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.message, self.details)
    }
}

/// Error-message patterns that are nondeterministic test-data artifacts, not
/// regressions. A candidate-only error matching one of these never fails the
/// comparison.
const BENIGN_ERROR_PATTERNS: &[&str] = &["invalid input syntax for type uuid"];

/// Report every distinct query-error message present in the candidate run
/// but absent from the reference run, minus the benign allow-list.
pub fn novel_query_errors(
    workload_name: &str,
    reference: &StatsSnapshot,
    candidate: &StatsSnapshot,
) -> Option<FailureDetail> {
    let mut new_errors = Vec::new();
    for (error, occurrences) in &candidate.queries.errors {
        if reference.queries.errors.contains_key(error) {
            continue;
        }
        if BENIGN_ERROR_PATTERNS
            .iter()
            .any(|pattern| error.contains(pattern))
        {
            continue;
        }
        new_errors.push(format!("{error} in queries: {occurrences:?}"));
    }
    if new_errors.is_empty() {
        return None;
    }
    Some(FailureDetail {
        message: format!("Workload {workload_name} has new errors"),
        details: new_errors.join("\n"),
        scope: Some(workload_name.to_string()),
    })
}

/// Default tabular diff: flags large latency and failure-rate deltas between
/// the two runs.
#[derive(Debug, Clone)]
pub struct ThresholdDiff {
    /// Candidate p99 must stay below reference p99 times this ratio.
    pub latency_ratio: f64,
    /// Small absolute latencies are noise; ignore regressions below this
    /// floor (milliseconds).
    pub latency_floor_ms: u64,
    /// Maximum tolerated increase of the failure rate (fraction of total).
    pub failure_rate_delta: f64,
}

impl Default for ThresholdDiff {
    fn default() -> Self {
        Self {
            latency_ratio: 2.0,
            latency_floor_ms: 100,
            failure_rate_delta: 0.05,
        }
    }
}

impl StatsDiff for ThresholdDiff {
    fn compare(
        &self,
        workload_name: &str,
        reference: &StatsSnapshot,
        candidate: &StatsSnapshot,
    ) -> Vec<FailureDetail> {
        let mut failures = Vec::new();
        let activities = [
            ("queries", &reference.queries, &candidate.queries),
            ("ingestions", &reference.ingestions, &candidate.ingestions),
        ];

        for (activity, old, new) in activities {
            if let (Some((_, _, old_p99, _)), Some((_, _, new_p99, _))) =
                (old.latency_percentiles_ms(), new.latency_percentiles_ms())
                && new_p99 > self.latency_floor_ms
                && (new_p99 as f64) > (old_p99 as f64) * self.latency_ratio
            {
                failures.push(FailureDetail {
                    message: format!("Workload {workload_name} has a {activity} latency regression"),
                    details: format!("p99 went from {old_p99}ms to {new_p99}ms"),
                    scope: Some(workload_name.to_string()),
                });
            }

            let old_rate = old.failure_rate();
            let new_rate = new.failure_rate();
            if new_rate - old_rate > self.failure_rate_delta {
                failures.push(FailureDetail {
                    message: format!(
                        "Workload {workload_name} has a {activity} failure-rate regression"
                    ),
                    details: format!(
                        "failure rate went from {:.1}% to {:.1}%",
                        old_rate * 100.0,
                        new_rate * 100.0
                    ),
                    scope: Some(workload_name.to_string()),
                });
            }
        }
        failures
    }
}

/// Runs the same workload against a reference and a candidate deployment and
/// fails with the aggregate of every regression found.
pub struct Benchmark {
    pub replay: Replay,
    pub deployments: Arc<dyn DeploymentManager>,
    pub renderer: Arc<dyn StatsRenderer>,
    pub diff: Arc<dyn StatsDiff>,
    pub workload_name: String,
    pub compare_against: String,
    pub seed: u64,
}

impl Benchmark {
    pub async fn run(&self, workload: &WorkloadSpec, options: &ReplayOptions) -> Result<()> {
        let mut options = options.clone();
        // Unscaled workloads always replay their full initial data.
        if !workload.settings.scale_data {
            options.factor_initial_data = 1.0;
        }

        let tag = self
            .deployments
            .resolve(&self.compare_against)
            .map_err(|_| Error::UnknownComparisonTarget(self.compare_against.clone()))?;

        println!("-- Running against {tag} (reference)");
        let (stats_old, old_version) = self.measure(workload, &options, Some(&tag)).await?;

        println!("-- Running against current version");
        let (stats_new, new_version) = self.measure(workload, &options, None).await?;

        println!("-- Comparing {old_version} against {new_version}");
        self.renderer.render(
            &self.workload_name,
            &stats_old,
            &stats_new,
            &old_version,
            &new_version,
        );

        let mut failures = self
            .diff
            .compare(&self.workload_name, &stats_old, &stats_new);
        if let Some(failure) = novel_query_errors(&self.workload_name, &stats_old, &stats_new) {
            failures.push(failure);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ComparisonFailed(failures))
        }
    }

    /// Deploy, replay, identify the version, tear down. The version is read
    /// from the running instance right after its run, never assumed from
    /// configuration; teardown happens even when the run fails so no state
    /// leaks into the next measurement.
    async fn measure(
        &self,
        workload: &WorkloadSpec,
        options: &ReplayOptions,
        version: Option<&str>,
    ) -> Result<(StatsSnapshot, String)> {
        self.deployments.deploy(version).await?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let run = self.replay.run(workload, options, &mut rng).await;
        let version = match &run {
            Ok(_) => self.replay.introspection.version().await,
            Err(_) => Ok(String::new()),
        };

        self.deployments.tear_down().await?;
        Ok((run?, version?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stats_with_query_errors(errors: &[&str]) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();
        for (i, error) in errors.iter().enumerate() {
            snapshot
                .queries
                .errors
                .insert(error.to_string(), vec![format!("q{i}")]);
        }
        snapshot
    }

    #[test]
    fn novel_errors_skip_known_and_benign_messages() {
        let reference = stats_with_query_errors(&["E1"]);
        let candidate = stats_with_query_errors(&[
            "E1",
            "E2",
            "invalid input syntax for type uuid: invalid character: found `V` at 4: \"005V\"",
        ]);

        let failure = novel_query_errors("wl.yaml", &reference, &candidate)
            .unwrap_or_else(|| panic!("expected a failure record"));
        assert!(failure.details.contains("E2"));
        assert!(!failure.details.contains("uuid"));
        assert_eq!(failure.details.lines().count(), 1);
        assert_eq!(failure.scope.as_deref(), Some("wl.yaml"));
    }

    #[test]
    fn no_novel_errors_means_no_failure() {
        let reference = stats_with_query_errors(&["E1"]);
        let candidate = stats_with_query_errors(&["E1"]);
        assert!(novel_query_errors("wl.yaml", &reference, &candidate).is_none());
    }

    fn stats_with_latencies(ms: &[u64], failed: u64) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();
        snapshot.queries.timings = ms.iter().map(|m| Duration::from_millis(*m)).collect();
        snapshot.queries.total = ms.len() as u64;
        snapshot.queries.failed = failed;
        snapshot
    }

    #[test]
    fn threshold_diff_flags_latency_regression() {
        let reference = stats_with_latencies(&[50; 100], 0);
        let candidate = stats_with_latencies(&[500; 100], 0);

        let failures = ThresholdDiff::default().compare("wl.yaml", &reference, &candidate);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("latency regression"));
    }

    #[test]
    fn threshold_diff_flags_failure_rate_regression() {
        let reference = stats_with_latencies(&[50; 100], 1);
        let candidate = stats_with_latencies(&[50; 100], 20);

        let failures = ThresholdDiff::default().compare("wl.yaml", &reference, &candidate);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("failure-rate regression"));
    }

    #[test]
    fn threshold_diff_ignores_sub_floor_latencies() {
        let reference = stats_with_latencies(&[10; 100], 0);
        let candidate = stats_with_latencies(&[90; 100], 0);

        let failures = ThresholdDiff::default().compare("wl.yaml", &reference, &candidate);
        assert!(failures.is_empty());
    }
}
