//! # Version module
//!
//! This module provide the cluster scoped custom resources of the version
//! catalog, each database references one of them by name in `spec.version`.

use std::fmt::Debug;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResource, CustomResourceExt, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::svc::crd::Kind;

// -----------------------------------------------------------------------------
// Constants

pub const GROUP: &str = "catalog.kubedb.com";
pub const VERSION: &str = "v1alpha1";

// -----------------------------------------------------------------------------
// Shared structures

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Image {
    #[serde(rename = "image")]
    pub image: String,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct SecurityContext {
    #[serde(rename = "runAsUser", default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct UpdateConstraints {
    #[serde(rename = "allowlist", default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist: Vec<String>,
    #[serde(rename = "denylist", default, skip_serializing_if = "Vec::is_empty")]
    pub denylist: Vec<String>,
}

/// fields shared by every version object
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Details {
    #[serde(rename = "version")]
    pub version: String,
    #[serde(rename = "db")]
    pub db: Image,
    #[serde(
        rename = "initContainer",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub init_container: Option<Image>,
    #[serde(rename = "exporter", default, skip_serializing_if = "Option::is_none")]
    pub exporter: Option<Image>,
    #[serde(rename = "deprecated", default)]
    pub deprecated: bool,
    #[serde(rename = "securityContext", default)]
    pub security_context: SecurityContext,
    #[serde(
        rename = "updateConstraints",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub update_constraints: Option<UpdateConstraints>,
}

// -----------------------------------------------------------------------------
// CatalogVersion trait

/// a version object of the catalog
pub trait CatalogVersion:
    Resource<DynamicType = ()> + CustomResourceExt + DeserializeOwned + Clone + Debug + Send + Sync
{
    /// kind of the database described by this version object
    const DATABASE: Kind;

    fn details(&self) -> &Details;

    fn version_name(&self) -> String {
        self.name_any()
    }
}

// -----------------------------------------------------------------------------
// Version custom resources

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "CassandraVersion")]
#[kube(plural = "cassandraversions", shortname = "casversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct CassandraVersionSpec {
    #[serde(flatten)]
    pub details: Details,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "ClickHouseVersion")]
#[kube(plural = "clickhouseversions", shortname = "chversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct ClickHouseVersionSpec {
    #[serde(flatten)]
    pub details: Details,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "DruidVersion")]
#[kube(plural = "druidversions", shortname = "drversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct DruidVersionSpec {
    #[serde(flatten)]
    pub details: Details,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "FerretDBVersion")]
#[kube(plural = "ferretdbversions", shortname = "frversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct FerretDBVersionSpec {
    #[serde(flatten)]
    pub details: Details,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "KafkaVersion")]
#[kube(plural = "kafkaversions", shortname = "kfversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct KafkaVersionSpec {
    #[serde(flatten)]
    pub details: Details,
    #[serde(rename = "cruiseControl", default, skip_serializing_if = "Option::is_none")]
    pub cruise_control: Option<Image>,
    #[serde(rename = "connectCluster", default, skip_serializing_if = "Option::is_none")]
    pub connect_cluster: Option<Image>,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "MSSQLServerVersion")]
#[kube(plural = "mssqlserverversions", shortname = "msversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct MSSQLServerVersionSpec {
    #[serde(flatten)]
    pub details: Details,
    #[serde(rename = "coordinator", default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<Image>,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "PgpoolVersion")]
#[kube(plural = "pgpoolversions", shortname = "ppversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct PgpoolVersionSpec {
    #[serde(flatten)]
    pub details: Details,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "RabbitMQVersion")]
#[kube(plural = "rabbitmqversions", shortname = "rmversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct RabbitMQVersionSpec {
    #[serde(flatten)]
    pub details: Details,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "SinglestoreVersion")]
#[kube(plural = "singlestoreversions", shortname = "sdbversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct SinglestoreVersionSpec {
    #[serde(flatten)]
    pub details: Details,
    #[serde(rename = "coordinator", default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<Image>,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "SolrVersion")]
#[kube(plural = "solrversions", shortname = "slversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct SolrVersionSpec {
    #[serde(flatten)]
    pub details: Details,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "catalog.kubedb.com", version = "v1alpha1", kind = "ZooKeeperVersion")]
#[kube(plural = "zookeeperversions", shortname = "zkversion")]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"DB_IMAGE", "type":"string", "jsonPath":".spec.db.image"}"#)]
#[kube(printcolumn = r#"{"name":"Deprecated", "type":"boolean", "jsonPath":".spec.deprecated"}"#)]
#[kube(derive = "PartialEq")]
pub struct ZooKeeperVersionSpec {
    #[serde(flatten)]
    pub details: Details,
}

impl CatalogVersion for CassandraVersion {
    const DATABASE: Kind = Kind::Cassandra;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

impl CatalogVersion for ClickHouseVersion {
    const DATABASE: Kind = Kind::ClickHouse;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

impl CatalogVersion for DruidVersion {
    const DATABASE: Kind = Kind::Druid;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

impl CatalogVersion for FerretDBVersion {
    const DATABASE: Kind = Kind::FerretDb;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

impl CatalogVersion for KafkaVersion {
    const DATABASE: Kind = Kind::Kafka;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

impl CatalogVersion for MSSQLServerVersion {
    const DATABASE: Kind = Kind::MsSqlServer;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

impl CatalogVersion for PgpoolVersion {
    const DATABASE: Kind = Kind::Pgpool;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

impl CatalogVersion for RabbitMQVersion {
    const DATABASE: Kind = Kind::RabbitMq;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

impl CatalogVersion for SinglestoreVersion {
    const DATABASE: Kind = Kind::Singlestore;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

impl CatalogVersion for SolrVersion {
    const DATABASE: Kind = Kind::Solr;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

impl CatalogVersion for ZooKeeperVersion {
    const DATABASE: Kind = Kind::ZooKeeper;

    fn details(&self) -> &Details {
        &self.spec.details
    }
}

// -----------------------------------------------------------------------------
// Helpers

/// returns the custom resource definitions of the version catalog
pub fn crds() -> Vec<(Kind, CustomResourceDefinition)> {
    vec![
        (Kind::Cassandra, CassandraVersion::crd()),
        (Kind::ClickHouse, ClickHouseVersion::crd()),
        (Kind::Druid, DruidVersion::crd()),
        (Kind::FerretDb, FerretDBVersion::crd()),
        (Kind::Kafka, KafkaVersion::crd()),
        (Kind::MsSqlServer, MSSQLServerVersion::crd()),
        (Kind::Pgpool, PgpoolVersion::crd()),
        (Kind::RabbitMq, RabbitMQVersion::crd()),
        (Kind::Singlestore, SinglestoreVersion::crd()),
        (Kind::Solr, SolrVersion::crd()),
        (Kind::ZooKeeper, ZooKeeperVersion::crd()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_object_is_deserialized() {
        let version: ZooKeeperVersion = serde_yaml::from_str(
            r#"
apiVersion: catalog.kubedb.com/v1alpha1
kind: ZooKeeperVersion
metadata:
  name: 3.8.3
spec:
  version: 3.8.3
  db:
    image: ghcr.io/appscode-images/zookeeper:3.8.3
  initContainer:
    image: ghcr.io/kubedb/zookeeper-init:0.0.1
  securityContext:
    runAsUser: 1000
"#,
        )
        .expect("version object to be deserialized");

        assert_eq!("3.8.3", version.version_name());
        assert_eq!(Some(1000), version.details().security_context.run_as_user);
        assert!(!version.details().deprecated);
        assert_eq!(Kind::ZooKeeper, ZooKeeperVersion::DATABASE);
    }

    #[test]
    fn catalog_definitions_are_cluster_scoped() {
        for (_, crd) in crds() {
            assert_eq!("Cluster", crd.spec.scope);
            assert_eq!(GROUP, crd.spec.group);
            assert_eq!(VERSION, crd.spec.versions[0].name);
        }
    }

    #[test]
    fn every_database_has_a_version_catalog() {
        let kinds: Vec<_> = crds().into_iter().map(|(kind, _)| kind).collect();
        assert_eq!(Kind::ALL.to_vec(), kinds);
    }

    #[test]
    fn coordinator_image_is_read() {
        let version: MSSQLServerVersion = serde_yaml::from_str(
            r#"
apiVersion: catalog.kubedb.com/v1alpha1
kind: MSSQLServerVersion
metadata:
  name: 2022-cu12
spec:
  version: "2022"
  db:
    image: mcr.microsoft.com/mssql/server:2022-CU12-ubuntu-22.04
  coordinator:
    image: ghcr.io/kubedb/mssql-coordinator:v0.1.0
  securityContext:
    runAsUser: 10001
"#,
        )
        .expect("version object to be deserialized");

        assert_eq!("2022-cu12", version.version_name());
        assert_eq!(
            Some("ghcr.io/kubedb/mssql-coordinator:v0.1.0"),
            version.spec.coordinator.as_ref().map(|image| image.image.as_str())
        );
        assert_eq!(Kind::MsSqlServer, MSSQLServerVersion::DATABASE);
    }
}
