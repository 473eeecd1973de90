use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::error::{Error, Result};

/// A recorded workload: object definitions grouped database -> schema ->
/// object, the recorded query set, and recorded ingestion statements.
///
/// Consumed read-only; parsing the on-disk format is the caller's concern.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkloadSpec {
    #[serde(default)]
    pub databases: BTreeMap<String, BTreeMap<String, ObjectGroup>>,
    #[serde(default)]
    pub queries: Vec<QueryDef>,
    #[serde(default)]
    pub ingestions: Vec<IngestionDef>,
    #[serde(default)]
    pub ddl: DdlSpec,
    #[serde(default)]
    pub bulk_load: Vec<BulkStatement>,
    #[serde(default)]
    pub settings: Settings,
}

/// Recorded schema-creation statements, split in two so that objects bulk
/// loading targets can exist before the load and objects depending on loaded
/// data can be created after it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DdlSpec {
    #[serde(default)]
    pub part_one: Vec<String>,
    #[serde(default)]
    pub part_two: Vec<String>,
}

/// One recorded bulk-load statement. `requires_target` marks statements that
/// need target objects to already exist (tables, webhook sources) as opposed
/// to loads into external source systems.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkStatement {
    pub sql: String,
    #[serde(default)]
    pub requires_target: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectGroup {
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionDef {
    /// Connection type tag; must parse into [`ConnectionType`].
    pub r#type: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryDef {
    pub name: String,
    pub sql: String,
}

/// One recorded continuous-ingestion statement, replayed at a scaled rate
/// against the connection it was recorded from.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionDef {
    pub connection: String,
    pub sql: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// When false, the initial-data factor is pinned to 1.0 in benchmark mode.
    #[serde(default = "default_true")]
    pub scale_data: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self { scale_data: true }
    }
}

/// The closed set of connection types a workload may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectionType {
    Postgres,
    Mysql,
    SqlServer,
    Kafka,
    ConfluentSchemaRegistry,
    SshTunnel,
    IcebergCatalog,
    AwsPrivatelink,
    Aws,
}

impl ConnectionType {
    /// Dependent services this connection type needs running.
    ///
    /// Kafka-family connections need the broker, the schema registry and the
    /// coordination service. Iceberg, PrivateLink and AWS connections are
    /// provisioned elsewhere (or cannot run locally) and need none here.
    pub fn required_services(self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["postgres"],
            Self::Mysql => &["mysql"],
            Self::SqlServer => &["sql-server"],
            Self::Kafka | Self::ConfluentSchemaRegistry => {
                &["kafka", "schema-registry", "zookeeper"]
            }
            Self::SshTunnel => &["ssh-bastion-host"],
            Self::IcebergCatalog | Self::AwsPrivatelink | Self::Aws => &[],
        }
    }
}

impl WorkloadSpec {
    /// Validate every connection tag and collect the dependent services the
    /// workload needs. An unrecognized tag is a configuration error raised
    /// here, before any service is started.
    pub fn required_services(&self) -> Result<BTreeSet<String>> {
        let mut services = BTreeSet::new();
        for schemas in self.databases.values() {
            for objects in schemas.values() {
                for connection in objects.connections.values() {
                    let ty: ConnectionType = connection
                        .r#type
                        .parse()
                        .map_err(|_| Error::UnknownConnectionType(connection.r#type.clone()))?;
                    services.extend(ty.required_services().iter().map(|s| s.to_string()));
                }
            }
        }
        Ok(services)
    }

    pub fn has_load(&self) -> bool {
        !self.queries.is_empty() || !self.ingestions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload_with_types(types: &[&str]) -> WorkloadSpec {
        let mut connections = BTreeMap::new();
        for (i, ty) in types.iter().enumerate() {
            connections.insert(
                format!("conn{i}"),
                ConnectionDef {
                    r#type: ty.to_string(),
                    params: BTreeMap::new(),
                },
            );
        }
        let mut schemas = BTreeMap::new();
        schemas.insert("public".to_string(), ObjectGroup { connections });
        let mut databases = BTreeMap::new();
        databases.insert("materialize".to_string(), schemas);
        WorkloadSpec {
            databases,
            ..WorkloadSpec::default()
        }
    }

    #[test]
    fn kafka_maps_to_broker_registry_and_coordination() {
        let services = workload_with_types(&["kafka"]).required_services();
        let services = services.unwrap_or_default();
        assert_eq!(
            services.into_iter().collect::<Vec<_>>(),
            vec!["kafka", "schema-registry", "zookeeper"]
        );
    }

    #[test]
    fn cloud_only_types_need_no_local_services() {
        let services = workload_with_types(&["iceberg-catalog", "aws-privatelink", "aws"])
            .required_services()
            .unwrap_or_default();
        assert!(services.is_empty());
    }

    #[test]
    fn unknown_connection_type_is_a_config_error() {
        let err = workload_with_types(&["postgres", "frobnicator"])
            .required_services()
            .unwrap_err();
        match err {
            Error::UnknownConnectionType(ty) => assert_eq!(ty, "frobnicator"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tags_round_trip_through_strum() {
        for tag in [
            "postgres",
            "mysql",
            "sql-server",
            "kafka",
            "confluent-schema-registry",
            "ssh-tunnel",
            "iceberg-catalog",
            "aws-privatelink",
            "aws",
        ] {
            let ty: ConnectionType = tag.parse().unwrap_or_else(|_| panic!("bad tag {tag}"));
            assert_eq!(ty.to_string(), tag);
        }
    }
}
