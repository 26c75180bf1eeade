//! # ClickHouse module
//!
//! This module provide the clickhouse custom resource and its definition, a
//! clickhouse database is either standalone or made of clusters of shards
//! coordinated by a clickhouse keeper.

use std::collections::BTreeSet;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LocalObjectReference, PersistentVolumeClaimSpec};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::{
    catalog::{Catalog, VersionInfo},
    crd::{
        default_version, lookup_version, set_halt_policy,
        template::{self, PodTemplateSpec},
        validate_pod_template, validate_storage_type, Database, DatabaseStatus, HealthCheckSpec,
        Kind, MonitorSpec, NamedServiceTemplateSpec, SecretReference, StorageType,
        TerminationPolicy,
    },
    k8s::field::{ErrorList, Path},
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "clickhouse";
pub const INIT_CONTAINER_NAME: &str = "clickhouse-init";

pub const HTTP_PORT: i32 = 8123;
pub const NATIVE_TCP_PORT: i32 = 9000;
pub const KEEPER_PORT: i32 = 9181;
pub const RAFT_PORT: i32 = 9234;

pub const RESERVED_VOLUMES: [&str; 1] = ["data"];
pub const RESERVED_VOLUME_MOUNT_PATHS: [&str; 1] = ["/var/lib/clickhouse"];

// -----------------------------------------------------------------------------
// Topology structures

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Cluster {
    #[serde(rename = "name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "replicas", default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(rename = "shards", default, skip_serializing_if = "Option::is_none")]
    pub shards: Option<i32>,
    #[serde(rename = "podTemplate", default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
    #[serde(rename = "storage", default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<PersistentVolumeClaimSpec>,
    #[serde(
        rename = "storageType",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub storage_type: Option<StorageType>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct KeeperSpec {
    #[serde(rename = "replicas", default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(rename = "podTemplate", default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
    #[serde(rename = "storage", default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<PersistentVolumeClaimSpec>,
    #[serde(
        rename = "storageType",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub storage_type: Option<StorageType>,
}

/// address of a keeper managed outside of kubedb
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct KeeperNode {
    #[serde(rename = "host", default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(rename = "port", default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Keeper {
    #[serde(
        rename = "externallyManaged",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub externally_managed: bool,
    #[serde(rename = "node", default, skip_serializing_if = "Option::is_none")]
    pub node: Option<KeeperNode>,
    #[serde(rename = "spec", default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<KeeperSpec>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct ClusterTopology {
    #[serde(rename = "cluster", default, skip_serializing_if = "Vec::is_empty")]
    pub cluster: Vec<Cluster>,
    #[serde(
        rename = "clickHouseKeeper",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub clickhouse_keeper: Option<Keeper>,
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "ClickHouse")]
#[kube(plural = "clickhouses")]
#[kube(shortname = "ch")]
#[kube(status = "DatabaseStatus")]
#[kube(namespaced)]
#[kube(derive = "PartialEq")]
#[kube(printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".apiVersion"}"#)]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#)]
pub struct Spec {
    #[serde(rename = "version", default)]
    pub version: String,
    #[serde(rename = "replicas", default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(
        rename = "clusterTopology",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_topology: Option<ClusterTopology>,
    #[serde(
        rename = "storageType",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub storage_type: Option<StorageType>,
    #[serde(rename = "storage", default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<PersistentVolumeClaimSpec>,
    #[serde(
        rename = "disableSecurity",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub disable_security: bool,
    #[serde(rename = "authSecret", default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<SecretReference>,
    #[serde(
        rename = "configSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub config_secret: Option<LocalObjectReference>,
    #[serde(rename = "podTemplate", default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
    #[serde(
        rename = "serviceTemplates",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub service_templates: Vec<NamedServiceTemplateSpec>,
    #[serde(rename = "halted", default, skip_serializing_if = "std::ops::Not::not")]
    pub halted: bool,
    #[serde(rename = "monitor", default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSpec>,
    #[serde(
        rename = "deletionPolicy",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub deletion_policy: Option<TerminationPolicy>,
    #[serde(
        rename = "healthChecker",
        default,
        skip_serializing_if = "HealthCheckSpec::is_empty"
    )]
    pub health_checker: HealthCheckSpec,
}

// -----------------------------------------------------------------------------
// Helpers

fn set_template_defaults(pod: &mut PodTemplateSpec, info: &VersionInfo) {
    pod.set_security_context_defaults(CONTAINER_NAME, INIT_CONTAINER_NAME, info.run_as_user, false);
    pod.set_container_resources_defaults(CONTAINER_NAME, &template::default_resources());
}

/// checks a storage type and its claim, `value` is reported for an unknown
/// type
fn validate_storage(
    errors: &mut ErrorList,
    path: &Path,
    name: &str,
    storage_type: Option<&StorageType>,
    storage: Option<&PersistentVolumeClaimSpec>,
) {
    match storage_type {
        Some(StorageType::Unknown(value)) => errors.invalid(
            path.child("storageType"),
            value,
            "StorageType should be either durable or ephemeral",
        ),
        storage_type => {
            validate_storage_type(errors, path.child("storageType"), name, storage_type)
        }
    }

    if storage.is_none() && storage_type == Some(&StorageType::Durable) {
        errors.invalid(
            path.child("storage"),
            name,
            "Storage can't be empty when StorageType is durable",
        );
    }
}

// -----------------------------------------------------------------------------
// ClickHouse implementation

impl ClickHouse {
    pub fn cluster_stateful_set_name(&self, cluster: &str, shard: i32) -> String {
        format!("{}-{}-shard-{}", self.offshoot_name(), cluster, shard)
    }

    pub fn cluster_governing_service_name(&self, stateful_set: &str) -> String {
        format!("{}-pods", stateful_set)
    }

    /// returns the secret holding the admin credentials
    pub fn auth_secret_name(&self) -> String {
        self.spec
            .auth_secret
            .as_ref()
            .map(|secret| secret.name.to_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.default_auth_secret_name())
    }

    /// returns the count of stateful sets expected, one per shard of each
    /// cluster
    pub fn expected_stateful_sets(&self) -> usize {
        match &self.spec.cluster_topology {
            Some(topology) => topology
                .cluster
                .iter()
                .map(|cluster| cluster.shards.unwrap_or(1).max(0) as usize)
                .sum(),
            None => 1,
        }
    }

    fn set_topology_defaults(&mut self) {
        let prefix = self.offshoot_name();
        let topology = match &mut self.spec.cluster_topology {
            Some(topology) => topology,
            None => return,
        };

        let mut taken: BTreeSet<String> = BTreeSet::new();
        for cluster in &mut topology.cluster {
            cluster.shards.get_or_insert(1);
            cluster.replicas.get_or_insert(1);
            cluster.storage_type.get_or_insert(StorageType::Durable);

            if cluster.name.is_empty() {
                let mut n = 1;
                while taken.contains(&format!("{}-{}", prefix, n)) {
                    n += 1;
                }

                cluster.name = format!("{}-{}", prefix, n);
            }

            taken.insert(cluster.name.to_owned());
        }

        if let Some(spec) = topology
            .clickhouse_keeper
            .as_mut()
            .filter(|keeper| !keeper.externally_managed)
            .and_then(|keeper| keeper.spec.as_mut())
        {
            spec.replicas.get_or_insert(1);
            spec.storage_type.get_or_insert(StorageType::Durable);
        }
    }

    fn validate_keeper(&self, errors: &mut ErrorList, keeper: &Keeper) {
        let name = self.name_any();
        let path = Path::new("spec")
            .child("clusterTopology")
            .child("clickHouseKeeper");

        if keeper.externally_managed {
            match &keeper.node {
                None => errors.invalid(
                    path.child("node"),
                    &name,
                    "ClickHouse Keeper node can't be empty when externally managed is true",
                ),
                Some(node) => {
                    if node.host.is_empty() {
                        errors.invalid(
                            path.child("node").child("host"),
                            &name,
                            "ClickHouse Keeper host can't be empty",
                        );
                    }

                    if node.port.is_none() {
                        errors.invalid(
                            path.child("node").child("port"),
                            &name,
                            "ClickHouse Keeper port can't be empty",
                        );
                    }
                }
            }

            if keeper.spec.is_some() {
                errors.invalid(
                    path.child("spec"),
                    &name,
                    "ClickHouse Keeper spec should be empty when externally managed is true",
                );
            }

            return;
        }

        match &keeper.spec {
            None => errors.invalid(
                path.child("spec"),
                &name,
                "spec can't be nil when externally managed is false",
            ),
            Some(spec) => {
                if spec.replicas.map(|r| r < 1).unwrap_or(false) {
                    errors.invalid(
                        path.child("spec").child("replicas"),
                        &name,
                        "number of replica can not be 0 or less",
                    );
                }

                validate_storage(
                    errors,
                    &path.child("spec"),
                    &name,
                    spec.storage_type.as_ref(),
                    spec.storage.as_ref(),
                );
            }
        }

        if keeper.node.is_some() {
            errors.invalid(
                path.child("node"),
                &name,
                "ClickHouse Keeper node should be empty when externally managed is false",
            );
        }
    }

    fn validate_cluster(&self, errors: &mut ErrorList, path: Path, cluster: &Cluster) {
        let name = self.name_any();

        if cluster.shards.map(|s| s <= 0).unwrap_or(false) {
            errors.invalid(
                path.child("shards"),
                &name,
                "number of shards can not be 0 or less",
            );
        }

        if cluster.replicas.map(|r| r <= 0).unwrap_or(false) {
            errors.invalid(
                path.child("replicas"),
                &name,
                "number of replicas can't be 0 or less",
            );
        }

        validate_storage(
            errors,
            &path,
            &name,
            cluster.storage_type.as_ref(),
            cluster.storage.as_ref(),
        );

        if let Some(pod) = &cluster.pod_template {
            validate_pod_template(
                errors,
                Self::KIND,
                &path.child("podTemplate"),
                &name,
                pod,
                &RESERVED_VOLUMES,
                &RESERVED_VOLUME_MOUNT_PATHS,
            );
        }
    }
}

#[async_trait]
impl Database for ClickHouse {
    const KIND: Kind = Kind::ClickHouse;

    fn termination_policy(&self) -> Option<TerminationPolicy> {
        self.spec.deletion_policy
    }

    fn default_auth_secret_name(&self) -> String {
        format!("{}-admin-cred", self.name_any())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn set_defaults(&mut self, catalog: &dyn Catalog) {
        let name = self.name_any();

        self.spec.deletion_policy.get_or_insert(TerminationPolicy::Delete);
        if !set_halt_policy(
            &mut self.spec.deletion_policy,
            self.spec.halted,
            Self::KIND,
            &name,
        ) {
            return;
        }

        if self.spec.cluster_topology.is_some() {
            self.set_topology_defaults();
        } else {
            self.spec.replicas.get_or_insert(1);
            self.spec.storage_type.get_or_insert(StorageType::Durable);
        }

        self.spec.health_checker.set_defaults(10, 10, 3);

        let info = match default_version(catalog, Self::KIND, &self.spec.version, &name).await {
            Some(info) => info,
            None => return,
        };

        match &mut self.spec.cluster_topology {
            Some(topology) => {
                for cluster in &mut topology.cluster {
                    set_template_defaults(
                        cluster.pod_template.get_or_insert_with(Default::default),
                        &info,
                    );
                }
            }
            None => {
                set_template_defaults(
                    self.spec.pod_template.get_or_insert_with(Default::default),
                    &info,
                );
            }
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn validate_create_or_update(&self, catalog: &dyn Catalog) -> ErrorList {
        let name = self.name_any();
        let mut errors = ErrorList::default();

        if let Err(err) = lookup_version(catalog, Self::KIND, &self.spec.version, &name).await {
            errors.push(err);
            return errors;
        }

        if self.spec.disable_security && self.spec.auth_secret.is_some() {
            errors.invalid(
                Path::new("spec").child("authSecret"),
                &name,
                "authSecret should be nil when security is disabled",
            );
            return errors;
        }

        let topology = match &self.spec.cluster_topology {
            Some(topology) => topology,
            None => {
                match self.spec.replicas {
                    Some(replicas) if replicas <= 0 => errors.invalid(
                        Path::new("spec").child("replicas"),
                        &name,
                        "number of replicas can't be 0 or less",
                    ),
                    Some(replicas) if replicas > 1 => errors.invalid(
                        Path::new("spec").child("replicas"),
                        &name,
                        "number of replicas can't be greater than 1 in standalone mode",
                    ),
                    _ => {}
                }

                if let Some(pod) = &self.spec.pod_template {
                    validate_pod_template(
                        &mut errors,
                        Self::KIND,
                        &Path::new("spec").child("podTemplate"),
                        &name,
                        pod,
                        &RESERVED_VOLUMES,
                        &RESERVED_VOLUME_MOUNT_PATHS,
                    );
                }

                validate_storage(
                    &mut errors,
                    &Path::new("spec"),
                    &name,
                    self.spec.storage_type.as_ref(),
                    self.spec.storage.as_ref(),
                );

                return errors;
            }
        };

        if let Some(keeper) = &topology.clickhouse_keeper {
            self.validate_keeper(&mut errors, keeper);
        }

        let path = Path::new("spec").child("clusterTopology").child("cluster");
        let mut names = BTreeSet::new();
        for (idx, cluster) in topology.cluster.iter().enumerate() {
            if !names.insert(cluster.name.as_str()) {
                errors.invalid(
                    path.index(idx).child("name"),
                    &name,
                    "cluster name is already exists, use different cluster name",
                );
            }

            self.validate_cluster(&mut errors, path.index(idx), cluster);
        }

        if self.spec.pod_template.is_some() {
            errors.invalid(
                Path::new("spec").child("podTemplate"),
                &name,
                "PodTemplate should be nil in clusterTopology",
            );
        }

        if self.spec.replicas.is_some() {
            errors.invalid(
                Path::new("spec").child("replicas"),
                &name,
                "replica should be nil in clusterTopology",
            );
        }

        if self.spec.storage_type.is_some() {
            errors.invalid(
                Path::new("spec").child("storageType"),
                &name,
                "StorageType should be empty in clusterTopology",
            );
        }

        if self.spec.storage.is_some() {
            errors.invalid(
                Path::new("spec").child("storage"),
                &name,
                "storage should be nil in clusterTopology",
            );
        }

        errors
    }
}
