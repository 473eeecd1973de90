use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "replay",
    author,
    version,
    about = "Replay recorded database workloads and compare target versions",
    long_about = "replay drives a recorded database workload (object creation, initial bulk data, continuous ingestions, continuous queries) against a running target instance and collects timing and resource statistics while the target converges.\n\nIn benchmark mode the same workload is replayed against a reference and a candidate version with matching seeds and the two runs are diffed for regressions.",
    after_help = "Examples:\n  replay run workloads/orders.yaml --runtime 5m\n  replay run workloads/orders.yaml --run-ingestions false --factor-queries 2.0\n  replay bench workloads/orders.yaml --compare-against latest --seed 42"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay a workload once against the running target
    Run(RunArgs),

    /// Replay a workload against two target versions and compare the runs
    Bench(BenchArgs),
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Connection string of the target system (Postgres wire protocol)
    #[arg(
        long,
        env = "REPLAY_TARGET",
        default_value = "host=127.0.0.1 port=6875 user=materialize dbname=materialize"
    )]
    pub target: String,

    /// Compose file describing the target and its dependent services
    #[arg(long, default_value = "compose.yaml")]
    pub compose_file: PathBuf,

    /// Compose project name, used for state-volume cleanup between runs
    #[arg(long, default_value = "replay")]
    pub project: String,
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Path to the recorded workload (.yaml)
    pub workload: PathBuf,

    /// Scale factor for initial bulk data volume
    #[arg(long, default_value_t = 1.0)]
    pub factor_initial_data: f64,

    /// Scale factor for the continuous ingestion rate
    #[arg(long, default_value_t = 1.0)]
    pub factor_ingestions: f64,

    /// Scale factor for the continuous query rate
    #[arg(long, default_value_t = 1.0)]
    pub factor_queries: f64,

    /// Runtime of the continuous ingestion/query phase
    #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
    pub runtime: Duration,

    /// Print every operation, not just phase boundaries
    #[arg(long)]
    pub verbose: bool,

    /// Create the workload's schema objects
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub create_objects: bool,

    /// Bulk-load the recorded initial data
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub initial_data: bool,

    /// Create only a subset of objects before bulk load and the rest after
    #[arg(long)]
    pub early_initial_data: bool,

    /// Run continuous ingestions
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub run_ingestions: bool,

    /// Run continuous queries
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub run_queries: bool,

    /// Maximum number of queries in flight at once
    #[arg(long, default_value_t = 100)]
    pub max_concurrent_queries: usize,

    /// Upper bound on each convergence wait (default: wait forever)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub max_convergence_wait: Option<Duration>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub replay: ReplayArgs,
}

#[derive(Debug, Args)]
pub struct BenchArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub replay: ReplayArgs,

    /// Reference version to compare the current build against
    /// (`latest` or an explicit `vX.Y.Z` tag)
    #[arg(long)]
    pub compare_against: String,

    /// Seed shared by the reference and candidate runs
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}
