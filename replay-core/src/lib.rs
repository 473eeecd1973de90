//! Workload replay execution and benchmark comparison engine.
//!
//! Replays a recorded database workload (object creation, initial bulk data,
//! continuous ingestion, continuous queries) against a running target,
//! gathers timing and resource statistics while the target converges, and in
//! benchmark mode diffs two runs to detect regressions and novel errors.

pub mod cancel;
pub mod client;
pub mod compare;
pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod stats;
pub mod workers;
pub mod workload;

pub use cancel::CancelSignal;
pub use client::{
    BulkLoader, ClientError, DeploymentManager, IngestionDriver, IntrospectionSource, LagEntry,
    ObjectCreator, QueryDriver, ResourceMonitor, ServiceManager, StatsDiff, StatsRenderer,
};
pub use compare::{Benchmark, FailureDetail, ThresholdDiff, novel_query_errors};
pub use error::{Error, Result};
pub use orchestrator::{Replay, ReplayOptions, SEED_RANGE};
pub use poller::{ConvergencePoller, PollerConfig};
pub use stats::{
    ActivitySnapshot, ActivityStats, ContainerUsage, InitialDataSnapshot, ResourceSample, RunStats,
    StatsSnapshot,
};
pub use workers::WorkerPool;
pub use workload::{BulkStatement, ConnectionType, DdlSpec, IngestionDef, QueryDef, WorkloadSpec};
