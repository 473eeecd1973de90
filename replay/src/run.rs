use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;

use replay_core::{
    Benchmark, PollerConfig, Replay, ReplayOptions, ResourceMonitor, ThresholdDiff, WorkloadSpec,
};

use crate::cli::{BenchArgs, ReplayArgs, RunArgs, TargetArgs};
use crate::compose::ComposeManager;
use crate::exit_codes::ExitCode;
use crate::monitor::{DockerStatsMonitor, HostMonitor};
use crate::output::{self, TextRenderer};
use crate::pg::{PgClient, SqlBulkLoader, SqlIngestion, SqlObjectCreator};
use crate::run_error::RunError;

pub async fn replay_cmd(args: RunArgs) -> Result<ExitCode, RunError> {
    let workload = load_workload(&args.replay.workload).await?;
    let options = build_options(&args.replay);
    let replay = build_replay(&args.target, &workload).await;

    let mut rng = StdRng::from_entropy();
    let snapshot = replay.run(&workload, &options, &mut rng).await?;
    output::print_replay_stats(&snapshot);
    Ok(ExitCode::Success)
}

pub async fn bench_cmd(args: BenchArgs) -> Result<ExitCode, RunError> {
    let workload = load_workload(&args.replay.workload).await?;
    let options = build_options(&args.replay);
    let replay = build_replay(&args.target, &workload).await;

    let manager = Arc::new(ComposeManager::new(
        args.target.compose_file.clone(),
        args.target.project.clone(),
    ));
    let benchmark = Benchmark {
        replay,
        deployments: manager,
        renderer: Arc::new(TextRenderer),
        diff: Arc::new(ThresholdDiff::default()),
        workload_name: workload_name(&args.replay.workload),
        compare_against: args.compare_against,
        seed: args.seed,
    };

    match benchmark.run(&workload, &options).await {
        Ok(()) => Ok(ExitCode::Success),
        Err(replay_core::Error::ComparisonFailed(failures)) => {
            eprintln!();
            eprintln!("Comparison failed with {} issue(s):", failures.len());
            for failure in &failures {
                eprintln!("  {failure}");
            }
            Ok(ExitCode::ComparisonFailed)
        }
        Err(err) => Err(err.into()),
    }
}

async fn load_workload(path: &Path) -> Result<WorkloadSpec, RunError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading workload {}", path.display()))
        .map_err(RunError::InvalidInput)?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing workload {}", path.display()))
        .map_err(RunError::InvalidInput)
}

fn workload_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn build_options(args: &ReplayArgs) -> ReplayOptions {
    ReplayOptions {
        factor_initial_data: args.factor_initial_data,
        factor_ingestions: args.factor_ingestions,
        factor_queries: args.factor_queries,
        runtime: args.runtime,
        verbose: args.verbose,
        create_objects: args.create_objects,
        initial_data: args.initial_data,
        early_initial_data: args.early_initial_data,
        run_ingestions: args.run_ingestions,
        run_queries: args.run_queries,
        max_concurrent_queries: args.max_concurrent_queries,
        poller: PollerConfig {
            max_wait: args.max_convergence_wait,
            ..PollerConfig::default()
        },
    }
}

async fn build_replay(target: &TargetArgs, workload: &WorkloadSpec) -> Replay {
    let client = Arc::new(PgClient::new(target.target.clone()));
    let ingestions = workload
        .ingestions
        .iter()
        .map(|def| {
            SqlIngestion::new(def.connection.clone(), def.sql.clone(), &target.target)
                as Arc<dyn replay_core::IngestionDriver>
        })
        .collect();

    Replay {
        introspection: client.clone(),
        objects: Arc::new(SqlObjectCreator::new(&target.target)),
        loader: Arc::new(SqlBulkLoader::new(&target.target)),
        ingestions,
        queries: client,
        monitor: pick_monitor(&target.project).await,
        services: Arc::new(ComposeManager::new(
            target.compose_file.clone(),
            target.project.clone(),
        )),
    }
}

/// Container-level sampling when docker is available, whole-host otherwise.
async fn pick_monitor(project: &str) -> Arc<dyn ResourceMonitor> {
    let docker = DockerStatsMonitor::new(project);
    if docker.probe().await {
        Arc::new(docker)
    } else {
        println!("docker stats unavailable, falling back to host-level sampling");
        Arc::new(HostMonitor::new())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::io::Write;

    const WORKLOAD_YAML: &str = r#"
databases:
  materialize:
    public:
      connections:
        orders_kafka:
          type: kafka
queries:
  - name: count_orders
    sql: SELECT count(*) FROM orders
ingestions:
  - connection: orders_kafka
    sql: INSERT INTO orders_staging VALUES (1)
ddl:
  part_one:
    - CREATE TABLE orders (id int)
  part_two:
    - CREATE MATERIALIZED VIEW order_counts AS SELECT count(*) FROM orders
settings:
  scale_data: false
"#;

    #[tokio::test]
    async fn loads_workload_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(WORKLOAD_YAML.as_bytes()).unwrap();

        let workload = load_workload(file.path()).await.unwrap();
        assert_eq!(workload.queries.len(), 1);
        assert_eq!(workload.ingestions[0].connection, "orders_kafka");
        assert_eq!(workload.ddl.part_one.len(), 1);
        assert!(!workload.settings.scale_data);
        let services = workload.required_services().unwrap();
        assert!(services.contains("kafka"));
    }

    #[tokio::test]
    async fn malformed_workload_is_invalid_input() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"queries: {not: [a, list}").unwrap();

        let err = load_workload(file.path()).await.unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);
    }

    #[tokio::test]
    async fn missing_workload_is_invalid_input() {
        let err = load_workload(Path::new("/nonexistent/workload.yaml"))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);
    }
}
