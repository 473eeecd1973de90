use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;

use crate::compare::FailureDetail;
use crate::stats::{ContainerUsage, StatsSnapshot};
use crate::workload::{QueryDef, WorkloadSpec};

/// Error from any collaborator operation against the target system or its
/// surrounding services. Messages are normalized by the caller before they
/// key error statistics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ClientError(pub String);

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Lag of one materialized object. `None` means lag is unmeasurable and must
/// be treated as worse than any finite value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagEntry {
    pub name: String,
    pub lag: Option<Duration>,
}

/// Read-only introspection of the running target: hydration status, lag
/// status and version identification.
#[async_trait]
pub trait IntrospectionSource: Send + Sync {
    /// Named user objects not yet fully materialized. System-internal objects
    /// and sinks are excluded at the source; a sink's hydration is observed
    /// through its downstream objects.
    async fn unhydrated_objects(&self) -> Result<Vec<String>, ClientError>;

    /// Materialization lag for user objects, worst first.
    async fn materialization_lag(&self) -> Result<Vec<LagEntry>, ClientError>;

    /// Version string of the running instance.
    async fn version(&self) -> Result<String, ClientError>;
}

/// Creates the workload's schema objects. Creation is split so that a subset
/// of objects can exist before bulk data load and the remainder after; the
/// split is the creator's contract with the workload, not inferred here.
#[async_trait]
pub trait ObjectCreator: Send + Sync {
    async fn create_part_one(
        &self,
        workload: &WorkloadSpec,
        verbose: bool,
    ) -> Result<(), ClientError>;

    async fn create_part_two(
        &self,
        workload: &WorkloadSpec,
        verbose: bool,
    ) -> Result<(), ClientError>;
}

/// Bulk-loads recorded initial data. Each method reports whether it actually
/// created anything, so the orchestrator can distinguish "bulk load happened"
/// from "nothing to do".
#[async_trait]
pub trait BulkLoader: Send + Sync {
    /// Load data into external source systems (Postgres, MySQL, Kafka, ...).
    async fn load_external(
        &self,
        workload: &WorkloadSpec,
        factor: f64,
        rng: &mut StdRng,
    ) -> Result<bool, ClientError>;

    /// Load data that needs target objects to already exist (e.g. tables and
    /// webhook sources fed through the target itself).
    async fn load_requiring_target(
        &self,
        workload: &WorkloadSpec,
        factor: f64,
        rng: &mut StdRng,
    ) -> Result<bool, ClientError>;
}

/// Produces one batch of new records for one continuously-ingesting
/// connection. The data-generation algorithm is the driver's concern.
#[async_trait]
pub trait IngestionDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn ingest(&self) -> Result<(), ClientError>;
}

/// Executes one replayed query against the target.
#[async_trait]
pub trait QueryDriver: Send + Sync {
    async fn execute(&self, query: &QueryDef) -> Result<(), ClientError>;
}

/// Takes one CPU/memory snapshot per running container.
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    async fn sample(&self) -> Result<Vec<ContainerUsage>, ClientError>;
}

/// Starts and stops the target system and its dependent services. This crate
/// only calls it at phase boundaries and never manages containers directly.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn ensure_up(&self, services: &[String]) -> Result<(), ClientError>;

    async fn tear_down(&self) -> Result<(), ClientError>;
}

/// Deploys a specific version of the target for benchmark comparison runs.
#[async_trait]
pub trait DeploymentManager: Send + Sync {
    /// Resolve a comparison target identifier to a concrete version tag.
    /// Fails for identifiers outside the supported set, before any service
    /// interaction.
    fn resolve(&self, target: &str) -> Result<String, ClientError>;

    /// Start the target at `version` (`None` means the current build) along
    /// with every dependent service.
    async fn deploy(&self, version: Option<&str>) -> Result<(), ClientError>;

    /// Stop and destroy the target and dependent services, including state
    /// volumes, so nothing leaks into the next measurement.
    async fn tear_down(&self) -> Result<(), ClientError>;
}

/// Renders a visual/textual comparison of two runs. Out-of-band reporting;
/// failures here do not affect the comparison verdict.
pub trait StatsRenderer: Send + Sync {
    fn render(
        &self,
        workload_name: &str,
        reference: &StatsSnapshot,
        candidate: &StatsSnapshot,
        old_version: &str,
        new_version: &str,
    );
}

/// Tabular diff of two runs, returning one failure record per regression.
pub trait StatsDiff: Send + Sync {
    fn compare(
        &self,
        workload_name: &str,
        reference: &StatsSnapshot,
        candidate: &StatsSnapshot,
    ) -> Vec<FailureDetail>;
}
