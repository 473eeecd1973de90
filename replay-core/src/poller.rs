use std::cmp::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use crate::client::{IntrospectionSource, LagEntry};
use crate::error::{Error, Result};

/// Cadences and bounds for the two convergence conditions.
///
/// `max_wait` is `None` by default: a genuinely stuck target blocks the run
/// indefinitely rather than being silently capped. Callers that prefer a
/// bound set one explicitly.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub hydration_interval: Duration,
    pub freshness_warmup: Duration,
    pub freshness_interval: Duration,
    pub lag_threshold: Duration,
    pub top_lagging: usize,
    pub max_wait: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            hydration_interval: Duration::from_secs(1),
            freshness_warmup: Duration::from_secs(10),
            freshness_interval: Duration::from_secs(5),
            lag_threshold: Duration::from_secs(10),
            top_lagging: 5,
            max_wait: None,
        }
    }
}

/// Blocks the orchestrator until the target is structurally ready
/// (hydration) and serving current data (freshness). The two conditions are
/// orthogonal and poll at different cadences; freshness only becomes
/// meaningful after ingestion has had time to begin, hence its warm-up.
pub struct ConvergencePoller<'a, S: IntrospectionSource + ?Sized> {
    source: &'a S,
    config: PollerConfig,
}

impl<'a, S: IntrospectionSource + ?Sized> ConvergencePoller<'a, S> {
    pub fn new(source: &'a S, config: PollerConfig) -> Self {
        Self { source, config }
    }

    /// Wait until no user object reports as unhydrated. The changed subset is
    /// printed only when it differs from the previous iteration.
    pub async fn await_hydration(&self) -> Result<()> {
        println!("Waiting for hydration");
        let started = Instant::now();
        let mut prev_not_hydrated: Vec<String> = Vec::new();
        loop {
            let not_hydrated = self.source.unhydrated_objects().await?;
            if not_hydrated.is_empty() {
                break;
            }
            if not_hydrated != prev_not_hydrated {
                println!("  Not yet hydrated: {}", not_hydrated.join(", "));
                prev_not_hydrated = not_hydrated;
            }
            self.check_deadline("hydration", started)?;
            tokio::time::sleep(self.config.hydration_interval).await;
        }
        println!("Hydration complete");
        Ok(())
    }

    /// Wait until no user materialization lags beyond the threshold.
    ///
    /// Sleeps once up front so the system has time to start processing
    /// imported data; otherwise frontiers haven't advanced yet and everything
    /// looks fresh.
    pub async fn await_freshness(&self) -> Result<()> {
        println!("Waiting for freshness");
        tokio::time::sleep(self.config.freshness_warmup).await;
        let started = Instant::now();
        loop {
            let entries = self.source.materialization_lag().await?;
            let lagging = self.top_lagging(entries);
            if lagging.is_empty() {
                break;
            }
            let summary = lagging
                .iter()
                .map(|e| format!("{} ({})", e.name, display_lag(e.lag)))
                .collect::<Vec<_>>()
                .join(", ");
            println!("  Lagging: {summary}");
            self.check_deadline("freshness", started)?;
            tokio::time::sleep(self.config.freshness_interval).await;
        }
        println!("Freshness complete");
        Ok(())
    }

    /// The worst `top_lagging` entries that exceed the threshold, worst
    /// first. A null lag is unmeasurable and ranks above every finite value.
    fn top_lagging(&self, mut entries: Vec<LagEntry>) -> Vec<LagEntry> {
        entries.sort_by(|a, b| match (a.lag, b.lag) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => b.cmp(&a),
        });
        entries
            .into_iter()
            .filter(|e| e.lag.is_none_or(|lag| lag > self.config.lag_threshold))
            .take(self.config.top_lagging)
            .collect()
    }

    fn check_deadline(&self, what: &'static str, started: Instant) -> Result<()> {
        if let Some(max_wait) = self.config.max_wait
            && started.elapsed() >= max_wait
        {
            return Err(Error::ConvergenceTimeout {
                what,
                waited: max_wait,
            });
        }
        Ok(())
    }
}

fn display_lag(lag: Option<Duration>) -> String {
    match lag {
        // Sentinel for "unmeasurable", displayed as a very large duration.
        None => "999h".to_string(),
        Some(lag) => humantime::format_duration(lag).to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use crate::client::ClientError;

    #[derive(Default)]
    struct ScriptedSource {
        hydration: Mutex<VecDeque<Vec<String>>>,
        lag: Mutex<VecDeque<Vec<LagEntry>>>,
        hydration_calls: AtomicUsize,
        lag_calls: AtomicUsize,
        first_lag_call_at: Mutex<Option<Instant>>,
    }

    #[async_trait]
    impl IntrospectionSource for ScriptedSource {
        async fn unhydrated_objects(&self) -> std::result::Result<Vec<String>, ClientError> {
            self.hydration_calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self.hydration.lock().unwrap().pop_front().unwrap())
        }

        async fn materialization_lag(&self) -> std::result::Result<Vec<LagEntry>, ClientError> {
            self.lag_calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.first_lag_call_at
                .lock()
                .unwrap()
                .get_or_insert_with(Instant::now);
            Ok(self.lag.lock().unwrap().pop_front().unwrap())
        }

        async fn version(&self) -> std::result::Result<String, ClientError> {
            Ok("v0.0.0-test".into())
        }
    }

    fn entry(name: &str, lag: Option<Duration>) -> LagEntry {
        LagEntry {
            name: name.to_string(),
            lag,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hydration_polls_until_empty() {
        let source = ScriptedSource::default();
        source.hydration.lock().unwrap().extend([
            vec!["mv1".to_string(), "mv2".to_string()],
            vec!["mv2".to_string()],
            vec![],
        ]);

        let before = Instant::now();
        let poller = ConvergencePoller::new(&source, PollerConfig::default());
        poller.await_hydration().await.unwrap();

        assert_eq!(source.hydration_calls.load(AtomicOrdering::SeqCst), 3);
        // One sleep after each of the two non-empty responses.
        assert_eq!(before.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn freshness_warms_up_once_and_ranks_null_lag_first() {
        let source = ScriptedSource::default();
        source.lag.lock().unwrap().extend([
            vec![
                entry("b", Some(Duration::from_secs(20))),
                entry("a", None),
            ],
            vec![],
        ]);

        let before = Instant::now();
        let config = PollerConfig::default();
        let poller = ConvergencePoller::new(&source, config.clone());
        poller.await_freshness().await.unwrap();

        assert_eq!(source.lag_calls.load(AtomicOrdering::SeqCst), 2);
        let first_call_at = source.first_lag_call_at.lock().unwrap().unwrap();
        // The warm-up delay happens exactly once, before the first query.
        assert_eq!(first_call_at - before, config.freshness_warmup);
        assert_eq!(
            before.elapsed(),
            config.freshness_warmup + config.freshness_interval
        );
    }

    #[tokio::test(start_paused = true)]
    async fn null_lag_exceeds_threshold_and_sorts_before_finite_lag() {
        let source = ScriptedSource::default();
        let poller = ConvergencePoller::new(&source, PollerConfig::default());

        let lagging = poller.top_lagging(vec![
            entry("b", Some(Duration::from_secs(20))),
            entry("fresh", Some(Duration::from_secs(1))),
            entry("a", None),
        ]);
        let names: Vec<&str> = lagging.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn top_lagging_is_capped() {
        let source = ScriptedSource::default();
        let poller = ConvergencePoller::new(&source, PollerConfig::default());

        let entries = (0..8)
            .map(|i| entry(&format!("mv{i}"), Some(Duration::from_secs(20 + i))))
            .collect();
        assert_eq!(poller.top_lagging(entries).len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_hydration_wait_times_out() {
        let source = ScriptedSource::default();
        source
            .hydration
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n(vec!["mv1".to_string()], 100));

        let config = PollerConfig {
            max_wait: Some(Duration::from_secs(5)),
            ..PollerConfig::default()
        };
        let poller = ConvergencePoller::new(&source, config);
        let err = poller.await_hydration().await.unwrap_err();
        match err {
            Error::ConvergenceTimeout { what, .. } => assert_eq!(what, "hydration"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
