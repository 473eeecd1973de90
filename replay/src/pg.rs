use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_postgres::{NoTls, SimpleQueryMessage};

use rand::Rng;
use rand::rngs::StdRng;

use replay_core::{
    BulkLoader, ClientError, IngestionDriver, IntrospectionSource, LagEntry, ObjectCreator,
    QueryDef, QueryDriver, WorkloadSpec,
};

/// Unhydrated user objects. Part of the target's introspection contract;
/// system-internal objects and sinks are excluded here (a sink's hydration is
/// observed through its downstream objects).
const HYDRATION_SQL: &str = "\
SELECT DISTINCT name
    FROM (
      SELECT o.name
      FROM mz_objects o
      JOIN mz_internal.mz_hydration_statuses h
        ON o.id = h.object_id
      WHERE NOT h.hydrated
        AND o.name NOT LIKE 'mz_%'
        AND o.id NOT IN (SELECT id FROM mz_sinks)

      UNION ALL

      SELECT o.name
      FROM mz_objects o
      JOIN mz_internal.mz_compute_hydration_statuses h
        ON o.id = h.object_id
      WHERE NOT h.hydrated
        AND o.name NOT LIKE 'mz_%'
        AND o.id NOT IN (SELECT id FROM mz_sinks)
    ) x
    ORDER BY 1;";

/// Materialization lag per user object, worst first with unmeasurable (null)
/// lag coalesced to a 999-hour sentinel and ranked above every finite value.
/// Part of the target's introspection contract.
const LAG_SQL: &str = "\
SELECT o.name, COALESCE(l.global_lag, INTERVAL '999 hours')::text
FROM mz_internal.mz_materialization_lag l
JOIN mz_objects o ON o.id = l.object_id
WHERE o.name NOT LIKE 'mz_%'
  AND o.id NOT IN (SELECT id FROM mz_sinks)
  AND (l.global_lag IS NULL OR l.global_lag > INTERVAL '10 seconds')
ORDER BY l.global_lag DESC NULLS FIRST
LIMIT 5;";

/// Sentinel the lag query substitutes for a null (unmeasurable) lag.
const UNMEASURABLE_LAG: Duration = Duration::from_secs(999 * 3600);

const VERSION_SQL: &str = "SELECT mz_version();";

/// Thin client for the target's Postgres wire protocol. Reconnects lazily
/// whenever the previous connection was lost, which happens by design between
/// benchmark deployments.
pub struct PgClient {
    conninfo: String,
    client: tokio::sync::Mutex<Option<tokio_postgres::Client>>,
}

impl PgClient {
    pub fn new(conninfo: impl Into<String>) -> Self {
        Self {
            conninfo: conninfo.into(),
            client: tokio::sync::Mutex::new(None),
        }
    }

    /// Run one statement and return all result rows as text columns.
    pub async fn simple_query(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, ClientError> {
        let mut guard = self.client.lock().await;
        if guard.as_ref().is_none_or(|client| client.is_closed()) {
            let (client, connection) = tokio_postgres::connect(&self.conninfo, NoTls)
                .await
                .map_err(|err| ClientError::new(err.to_string()))?;
            tokio::spawn(async move {
                // Drives the connection; ends when the client is dropped.
                if let Err(err) = connection.await {
                    eprintln!("target connection error: {err}");
                }
            });
            *guard = Some(client);
        }

        let client = guard
            .as_ref()
            .ok_or_else(|| ClientError::new("target connection unavailable"))?;
        let messages = client
            .simple_query(sql)
            .await
            .map_err(|err| ClientError::new(err.to_string()))?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                rows.push(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_string))
                        .collect(),
                );
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl IntrospectionSource for PgClient {
    async fn unhydrated_objects(&self) -> Result<Vec<String>, ClientError> {
        let rows = self.simple_query(HYDRATION_SQL).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    async fn materialization_lag(&self) -> Result<Vec<LagEntry>, ClientError> {
        let rows = self.simple_query(LAG_SQL).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut columns = row.into_iter();
                let name = columns.next().flatten().unwrap_or_default();
                let lag = columns.next().flatten().as_deref().and_then(lag_from_text);
                LagEntry { name, lag }
            })
            .collect())
    }

    async fn version(&self) -> Result<String, ClientError> {
        let rows = self.simple_query(VERSION_SQL).await?;
        rows.into_iter()
            .next()
            .and_then(|row| row.into_iter().next().flatten())
            .ok_or_else(|| ClientError::new("version query returned no rows"))
    }
}

#[async_trait]
impl QueryDriver for PgClient {
    async fn execute(&self, query: &QueryDef) -> Result<(), ClientError> {
        self.simple_query(&query.sql).await.map(|_| ())
    }
}

/// Replays one recorded ingestion statement against the target on its own
/// connection, so ingestions don't serialize behind queries.
pub struct SqlIngestion {
    name: String,
    sql: String,
    client: PgClient,
}

impl SqlIngestion {
    pub fn new(name: impl Into<String>, sql: impl Into<String>, conninfo: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            sql: sql.into(),
            client: PgClient::new(conninfo),
        })
    }
}

#[async_trait]
impl IngestionDriver for SqlIngestion {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ingest(&self) -> Result<(), ClientError> {
        self.client.simple_query(&self.sql).await.map(|_| ())
    }
}

/// Runs the workload's recorded DDL against the target, in the recorded
/// split: the first part before bulk load, the second part after (or earlier,
/// at the orchestrator's discretion).
pub struct SqlObjectCreator {
    client: PgClient,
}

impl SqlObjectCreator {
    pub fn new(conninfo: &str) -> Self {
        Self {
            client: PgClient::new(conninfo),
        }
    }

    async fn run_statements(
        &self,
        statements: &[String],
        verbose: bool,
    ) -> Result<(), ClientError> {
        for sql in statements {
            if verbose {
                println!("> {sql}");
            }
            self.client.simple_query(sql).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectCreator for SqlObjectCreator {
    async fn create_part_one(
        &self,
        workload: &WorkloadSpec,
        verbose: bool,
    ) -> Result<(), ClientError> {
        self.run_statements(&workload.ddl.part_one, verbose).await
    }

    async fn create_part_two(
        &self,
        workload: &WorkloadSpec,
        verbose: bool,
    ) -> Result<(), ClientError> {
        self.run_statements(&workload.ddl.part_two, verbose).await
    }
}

/// Replays the workload's recorded bulk-load statements. The initial-data
/// factor scales how many times each statement repeats; the rng keeps repeat
/// counts reproducible across comparison runs with the same seed.
pub struct SqlBulkLoader {
    client: PgClient,
}

impl SqlBulkLoader {
    pub fn new(conninfo: &str) -> Self {
        Self {
            client: PgClient::new(conninfo),
        }
    }

    async fn load(
        &self,
        workload: &WorkloadSpec,
        factor: f64,
        rng: &mut StdRng,
        requires_target: bool,
    ) -> Result<bool, ClientError> {
        let mut created = false;
        for statement in workload
            .bulk_load
            .iter()
            .filter(|s| s.requires_target == requires_target)
        {
            for _ in 0..repetitions(factor, rng) {
                self.client.simple_query(&statement.sql).await?;
                created = true;
            }
        }
        Ok(created)
    }
}

#[async_trait]
impl BulkLoader for SqlBulkLoader {
    async fn load_external(
        &self,
        workload: &WorkloadSpec,
        factor: f64,
        rng: &mut StdRng,
    ) -> Result<bool, ClientError> {
        self.load(workload, factor, rng, false).await
    }

    async fn load_requiring_target(
        &self,
        workload: &WorkloadSpec,
        factor: f64,
        rng: &mut StdRng,
    ) -> Result<bool, ClientError> {
        self.load(workload, factor, rng, true).await
    }
}

/// Repeat count for one bulk statement at the given scale factor. Fractional
/// factors round probabilistically so that e.g. 1.5 averages out to 1.5x
/// instead of always truncating.
fn repetitions(factor: f64, rng: &mut StdRng) -> u64 {
    if factor <= 0.0 {
        return 0;
    }
    let whole = factor.floor() as u64;
    let fraction = factor - factor.floor();
    if fraction > 0.0 && rng.gen_bool(fraction) {
        whole + 1
    } else {
        whole
    }
}

/// Interpret one lag column value. The query's 999-hour sentinel stands for a
/// null lag, which the poller must rank as worse than any finite value, so it
/// maps back to `None` here. Unparseable text is also treated as unmeasurable.
fn lag_from_text(text: &str) -> Option<Duration> {
    parse_interval(text).filter(|lag| *lag < UNMEASURABLE_LAG)
}

/// Parse Postgres interval text (`HH:MM:SS[.f]`, optionally preceded by
/// `N day(s)` / `N hour(s)` / ... components).
fn parse_interval(text: &str) -> Option<Duration> {
    let mut secs = 0.0_f64;
    let mut tokens = text.split_whitespace();
    while let Some(token) = tokens.next() {
        // Lag is never negative; a sign means ago-style intervals this caller
        // doesn't produce. Checked up front because "-00" parses as -0.0 and
        // would lose the sign.
        if token.starts_with('-') {
            return None;
        }
        if token.contains(':') {
            let mut parts = token.split(':');
            let hours: f64 = parts.next()?.parse().ok()?;
            let minutes: f64 = parts.next()?.parse().ok()?;
            let seconds: f64 = match parts.next() {
                Some(s) => s.parse().ok()?,
                None => 0.0,
            };
            if parts.next().is_some() {
                return None;
            }
            secs += hours * 3600.0 + minutes * 60.0 + seconds;
        } else if let Ok(value) = token.parse::<f64>() {
            let unit = tokens.next()?;
            let multiplier = match unit.trim_end_matches('s') {
                "day" => 86_400.0,
                "hour" => 3_600.0,
                "minute" | "min" => 60.0,
                "second" | "sec" => 1.0,
                _ => return None,
            };
            secs += value * multiplier;
        } else {
            return None;
        }
    }
    Some(Duration::from_secs_f64(secs))
}
