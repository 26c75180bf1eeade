//! # Druid module
//!
//! This module provide the druid custom resource and its definition. A druid
//! cluster is made of dedicated nodes, coordinators, brokers, middle managers
//! and historicals are required while overlords and routers are optional. It
//! relies on a metadata storage, a deep storage and a zookeeper ensemble.

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{
        EmptyDirVolumeSource, LocalObjectReference, PersistentVolumeClaimSpec,
        ResourceRequirements,
    },
    apimachinery::pkg::api::resource::Quantity,
};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::{
    catalog::{Catalog, VersionInfo},
    crd::{
        default_version, lookup_version, major_version,
        template::{self, PodTemplateSpec},
        Database, DatabaseStatus, HealthCheckSpec, Kind, MonitorSpec, NamedServiceTemplateSpec,
        SecretReference, StorageType, TerminationPolicy, TlsConfig,
    },
    k8s::{
        field::{ErrorList, Invalid, Path},
        resource::requirements,
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "druid";
pub const INIT_CONTAINER_NAME: &str = "init-druid";

pub const EXPORTER_PORT: i32 = 9104;
pub const ADMIN_USER: &str = "admin";

pub const ROLE_COORDINATORS: &str = "coordinators";
pub const ROLE_OVERLORDS: &str = "overlords";
pub const ROLE_BROKERS: &str = "brokers";
pub const ROLE_ROUTERS: &str = "routers";
pub const ROLE_MIDDLE_MANAGERS: &str = "middleManagers";
pub const ROLE_HISTORICALS: &str = "historicals";

pub const DEFAULT_ZOOKEEPER_VERSION: &str = "3.7.2";
pub const DEFAULT_MYSQL_VERSION: &str = "8.0.35";
pub const DEFAULT_POSTGRES_VERSION: &str = "13.13";
pub const DEFAULT_LINKED_DB: &str = "druid";

/// druid images are run as a non root user starting from this major version
pub const RESTRICTED_SINCE_MAJOR: u64 = 25;

pub const RESERVED_VOLUMES: [&str; 4] = [
    "operator-config-volume",
    "main-config-volume",
    "custom-config",
    "mysql-metadata-storage",
];
pub const RESERVED_VOLUME_MOUNT_PATHS: [&str; 4] = [
    "/opt/druid/extensions/mysql-metadata-storage",
    "/tmp/config/operator-config",
    "/opt/druid/conf",
    "/tmp/config/custom-config",
];

pub const HISTORICALS_SEGMENT_CACHE_VOLUME: &str = "segment-cache";
pub const HISTORICALS_SEGMENT_CACHE_DIR: &str = "/druid/data/segments";
pub const MIDDLE_MANAGERS_BASE_TASK_VOLUME: &str = "base-task-dir";
pub const MIDDLE_MANAGERS_BASE_TASK_DIR: &str = "/var/druid/task";

/// resources given to a middle manager that does not request any, tasks are
/// run in its memory
pub fn middle_managers_resources() -> ResourceRequirements {
    requirements(".500", "2.5Gi", "2.5Gi")
}

/// returns the plaintext port served by the nodes of the role
pub fn plaintext_port(role: &str) -> Option<i32> {
    match role {
        ROLE_COORDINATORS => Some(8081),
        ROLE_OVERLORDS => Some(8090),
        ROLE_HISTORICALS => Some(8083),
        ROLE_MIDDLE_MANAGERS => Some(8091),
        ROLE_BROKERS => Some(8082),
        ROLE_ROUTERS => Some(8888),
        _ => None,
    }
}

// -----------------------------------------------------------------------------
// Storage structures

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum MetadataStorageType {
    MySQL,
    PostgreSQL,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct MetadataStorage {
    #[serde(rename = "name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "namespace", default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub type_: Option<MetadataStorageType>,
    #[serde(
        rename = "createTables",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub create_tables: Option<bool>,
    #[serde(rename = "linkedDB", default, skip_serializing_if = "String::is_empty")]
    pub linked_db: String,
    #[serde(
        rename = "externallyManaged",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub externally_managed: bool,
    #[serde(rename = "version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct DeepStorageSpec {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(
        rename = "configSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub config_secret: Option<LocalObjectReference>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ZooKeeperRef {
    #[serde(rename = "name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "namespace", default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(rename = "pathsBase", default, skip_serializing_if = "String::is_empty")]
    pub paths_base: String,
    #[serde(
        rename = "externallyManaged",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub externally_managed: bool,
    #[serde(rename = "version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

// -----------------------------------------------------------------------------
// Topology structures

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Node {
    #[serde(rename = "replicas", default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(rename = "suffix", default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,
    #[serde(
        rename = "podTemplate",
        default,
        skip_serializing_if = "PodTemplateSpec::is_empty"
    )]
    pub pod_template: PodTemplateSpec,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct DataNode {
    #[serde(rename = "replicas", default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(rename = "suffix", default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,
    #[serde(
        rename = "podTemplate",
        default,
        skip_serializing_if = "PodTemplateSpec::is_empty"
    )]
    pub pod_template: PodTemplateSpec,
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
        rename = "ephemeralStorage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ephemeral_storage: Option<EmptyDirVolumeSource>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Topology {
    #[serde(
        rename = "coordinators",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub coordinators: Option<Node>,
    #[serde(rename = "overlords", default, skip_serializing_if = "Option::is_none")]
    pub overlords: Option<Node>,
    #[serde(rename = "brokers", default, skip_serializing_if = "Option::is_none")]
    pub brokers: Option<Node>,
    #[serde(rename = "routers", default, skip_serializing_if = "Option::is_none")]
    pub routers: Option<Node>,
    #[serde(
        rename = "middleManagers",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub middle_managers: Option<DataNode>,
    #[serde(
        rename = "historicals",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub historicals: Option<DataNode>,
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "Druid")]
#[kube(plural = "druids")]
#[kube(shortname = "dr")]
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
    #[serde(rename = "topology", default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,
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
    #[serde(
        rename = "enableSSL",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub enable_ssl: bool,
    #[serde(
        rename = "keystoreCredSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub keystore_cred_secret: Option<SecretReference>,
    #[serde(rename = "tls", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(
        rename = "metadataStorage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata_storage: Option<MetadataStorage>,
    #[serde(
        rename = "deepStorage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deep_storage: Option<DeepStorageSpec>,
    #[serde(
        rename = "zookeeperRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub zookeeper_ref: Option<ZooKeeperRef>,
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

/// claim requested for durable data nodes without storage
pub fn default_storage() -> PersistentVolumeClaimSpec {
    PersistentVolumeClaimSpec {
        access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
        resources: Some(ResourceRequirements {
            requests: Some([("storage".to_owned(), Quantity("1Gi".to_owned()))].into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn set_template_defaults(pod: &mut PodTemplateSpec, role: &str, info: &VersionInfo) {
    if major_version(&info.version).unwrap_or_default() <= RESTRICTED_SINCE_MAJOR {
        return;
    }

    pod.set_security_context_defaults(CONTAINER_NAME, INIT_CONTAINER_NAME, info.run_as_user, false);
    let resources = match role {
        ROLE_MIDDLE_MANAGERS => middle_managers_resources(),
        _ => template::default_resources(),
    };

    pod.set_container_resources_defaults(CONTAINER_NAME, &resources);
    pod.set_init_container_resources_defaults(
        INIT_CONTAINER_NAME,
        &template::default_init_container_resources(),
    );
}

fn set_node_defaults(node: &mut Node, role: &str, info: &VersionInfo) {
    node.replicas.get_or_insert(1);
    set_template_defaults(&mut node.pod_template, role, info);
}

fn set_data_node_defaults(node: &mut DataNode, role: &str, info: &VersionInfo) {
    node.replicas.get_or_insert(1);
    let storage_type = node.storage_type.get_or_insert(StorageType::Durable);
    if *storage_type == StorageType::Durable && node.storage.is_none() {
        node.storage = Some(default_storage());
    }

    set_template_defaults(&mut node.pod_template, role, info);
}

/// returns the reserved volume names and mount paths of the nodes of the role
fn reserved(role: &str) -> (Vec<&'static str>, Vec<&'static str>) {
    let mut volumes = RESERVED_VOLUMES.to_vec();
    let mut mount_paths = RESERVED_VOLUME_MOUNT_PATHS.to_vec();

    match role {
        ROLE_HISTORICALS => {
            volumes.push(HISTORICALS_SEGMENT_CACHE_VOLUME);
            mount_paths.push(HISTORICALS_SEGMENT_CACHE_DIR);
        }
        ROLE_MIDDLE_MANAGERS => {
            volumes.push(MIDDLE_MANAGERS_BASE_TASK_VOLUME);
            mount_paths.push(MIDDLE_MANAGERS_BASE_TASK_DIR);
        }
        _ => {}
    }

    (volumes, mount_paths)
}

// -----------------------------------------------------------------------------
// Druid implementation

impl Druid {
    /// returns the name of the secret holding the credentials of the user
    pub fn user_cred_secret_name(&self, user: &str) -> String {
        format!("{}-{}-cred", self.name_any(), user.replace('_', "-"))
    }

    pub fn metadata_storage_name(&self) -> String {
        let storage_type = self
            .spec
            .metadata_storage
            .as_ref()
            .and_then(|storage| storage.type_);

        match storage_type {
            Some(MetadataStorageType::PostgreSQL) => format!("{}-pg-metadata", self.offshoot_name()),
            _ => format!("{}-mysql-metadata", self.offshoot_name()),
        }
    }

    pub fn zookeeper_name(&self) -> String {
        format!("{}-zk", self.offshoot_name())
    }

    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn set_metadata_storage_defaults(&mut self) {
        let name = self.metadata_storage_name();
        let namespace = self.namespace().unwrap_or_default();
        let storage = self.spec.metadata_storage.get_or_insert_with(Default::default);

        if storage.name.is_empty() {
            storage.externally_managed = false;
            storage.name = name;
        }

        if storage.namespace.is_empty() {
            storage.namespace = namespace;
        }

        if storage.linked_db.is_empty() {
            storage.linked_db = DEFAULT_LINKED_DB.to_owned();
        }

        storage.create_tables.get_or_insert(true);

        // the type of an externally managed storage is read from its binding
        if storage.type_.is_none() && !storage.externally_managed {
            storage.type_ = Some(MetadataStorageType::MySQL);
        }

        if storage.version.is_none() {
            storage.version = Some(match storage.type_ {
                Some(MetadataStorageType::MySQL) => DEFAULT_MYSQL_VERSION.to_owned(),
                _ => DEFAULT_POSTGRES_VERSION.to_owned(),
            });
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn set_zookeeper_ref_defaults(&mut self) {
        let name = self.zookeeper_name();
        let namespace = self.namespace().unwrap_or_default();
        let zookeeper = self.spec.zookeeper_ref.get_or_insert_with(Default::default);

        if zookeeper.name.is_empty() {
            zookeeper.externally_managed = false;
            zookeeper.name = name;
        }

        if zookeeper.namespace.is_empty() {
            zookeeper.namespace = namespace;
        }

        zookeeper
            .version
            .get_or_insert_with(|| DEFAULT_ZOOKEEPER_VERSION.to_owned());
    }

    fn validate_node_template(&self, errors: &mut ErrorList, role: &str, template: &PodTemplateSpec) {
        let name = self.name_any();
        // mount path errors are reported on the volumes as well
        let path = Path::new("spec")
            .child("topology")
            .child(role)
            .child("podTemplate")
            .child("spec")
            .child("volumes");

        let (volumes, mount_paths) = reserved(role);
        if let Err(err) = template.validate_volumes(&volumes) {
            errors.invalid(path.to_owned(), &name, err.reported_for(Self::KIND));
        }

        if let Err(err) = template.validate_volume_mount_paths(&mount_paths) {
            errors.invalid(path, &name, err);
        }
    }

    fn validate_node(&self, errors: &mut ErrorList, role: &str, replicas: Option<i32>, template: &PodTemplateSpec) {
        if replicas.map(|r| r <= 0).unwrap_or(false) {
            errors.invalid(
                Path::new("spec").child("topology").child(role).child("replicas"),
                self.name_any(),
                "number of replicas can not be 0 or less",
            );
        }

        self.validate_node_template(errors, role, template);
    }

    fn validate_data_node(&self, errors: &mut ErrorList, role: &str, node: &DataNode) {
        let name = self.name_any();
        let path = Path::new("spec").child("topology").child(role);

        self.validate_node(errors, role, node.replicas, &node.pod_template);

        match &node.storage_type {
            None => errors.invalid(
                path.child("storageType"),
                &name,
                format!("spec.topology.{}.storageType can not be empty", role),
            ),
            Some(StorageType::Unknown(_)) => errors.invalid(
                Path::new("spec").child("storageType"),
                &name,
                format!(
                    "spec.topology.{}.storageType should either be durable or ephemeral",
                    role
                ),
            ),
            Some(_) => {}
        }

        let storage_type = node.storage_type.as_ref();
        if storage_type == Some(&StorageType::Ephemeral) && node.storage.is_some() {
            errors.invalid(
                path.child("storage"),
                &name,
                format!(
                    "spec.topology.{}.storage can not be set when d.spec.topology.{}.storageType is Ephemeral",
                    role, role
                ),
            );
        }

        if storage_type == Some(&StorageType::Durable) && node.ephemeral_storage.is_some() {
            errors.invalid(
                path.child("ephemeralStorage"),
                &name,
                format!(
                    "spec.topology.{}.ephemeralStorage can not be set when d.spec.topology.{}.storageType is Durable",
                    role, role
                ),
            );
        }

        if storage_type == Some(&StorageType::Durable) && node.storage.is_none() {
            errors.invalid(
                path.child("storage"),
                &name,
                format!(
                    "spec.topology.{}.storage needs to be set when spec.topology.{}.storageType is Durable",
                    role, role
                ),
            );
        }
    }

    fn validate_topology(&self, errors: &mut ErrorList, topology: &Topology) {
        let name = self.name_any();
        let path = Path::new("spec").child("topology");
        let missing = |errors: &mut ErrorList, role: &str| {
            errors.invalid(
                path.child(role),
                &name,
                format!("spec.topology.{} can not be empty", role),
            )
        };

        match &topology.coordinators {
            Some(node) => self.validate_node(errors, ROLE_COORDINATORS, node.replicas, &node.pod_template),
            None => missing(errors, ROLE_COORDINATORS),
        }

        match &topology.brokers {
            Some(node) => self.validate_node(errors, ROLE_BROKERS, node.replicas, &node.pod_template),
            None => missing(errors, ROLE_BROKERS),
        }

        if let Some(node) = &topology.overlords {
            self.validate_node(errors, ROLE_OVERLORDS, node.replicas, &node.pod_template);
        }

        if let Some(node) = &topology.routers {
            self.validate_node(errors, ROLE_ROUTERS, node.replicas, &node.pod_template);
        }

        match &topology.middle_managers {
            Some(node) => self.validate_data_node(errors, ROLE_MIDDLE_MANAGERS, node),
            None => missing(errors, ROLE_MIDDLE_MANAGERS),
        }

        match &topology.historicals {
            Some(node) => self.validate_data_node(errors, ROLE_HISTORICALS, node),
            None => missing(errors, ROLE_HISTORICALS),
        }
    }
}

#[async_trait]
impl Database for Druid {
    const KIND: Kind = Kind::Druid;

    fn termination_policy(&self) -> Option<TerminationPolicy> {
        self.spec.deletion_policy
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn set_defaults(&mut self, catalog: &dyn Catalog) {
        let name = self.name_any();

        self.spec.deletion_policy.get_or_insert(TerminationPolicy::Delete);
        if !self.spec.disable_security && self.spec.auth_secret.is_none() {
            self.spec.auth_secret = Some(SecretReference {
                name: self.user_cred_secret_name(ADMIN_USER),
                ..Default::default()
            });
        }

        let info = match default_version(catalog, Self::KIND, &self.spec.version, &name).await {
            Some(info) => info,
            None => return,
        };

        if let Some(topology) = &mut self.spec.topology {
            set_node_defaults(
                topology.coordinators.get_or_insert_with(Default::default),
                ROLE_COORDINATORS,
                &info,
            );

            if let Some(node) = &mut topology.overlords {
                set_node_defaults(node, ROLE_OVERLORDS, &info);
            }

            set_data_node_defaults(
                topology.middle_managers.get_or_insert_with(Default::default),
                ROLE_MIDDLE_MANAGERS,
                &info,
            );
            set_data_node_defaults(
                topology.historicals.get_or_insert_with(Default::default),
                ROLE_HISTORICALS,
                &info,
            );
            set_node_defaults(
                topology.brokers.get_or_insert_with(Default::default),
                ROLE_BROKERS,
                &info,
            );

            if let Some(node) = &mut topology.routers {
                set_node_defaults(node, ROLE_ROUTERS, &info);
            }
        }

        self.set_metadata_storage_defaults();
        self.set_zookeeper_ref_defaults();
        self.spec.health_checker.set_defaults(30, 10, 3);

        if let Some(monitor) = &mut self.spec.monitor {
            monitor.set_defaults(EXPORTER_PORT, info.run_as_user);
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn validate_create_or_update(&self, catalog: &dyn Catalog) -> ErrorList {
        let name = self.name_any();
        let mut errors = ErrorList::default();

        if self.spec.version.is_empty() {
            errors.invalid(
                Path::new("spec").child("version"),
                &name,
                "spec.version is missing",
            );
        } else if let Err(err) = lookup_version(catalog, Self::KIND, &self.spec.version, &name).await {
            errors.push(err);
        }

        match &self.spec.deep_storage {
            None => errors.invalid(
                Path::new("spec").child("deepStorage"),
                &name,
                "spec.deepStorage is missing",
            ),
            Some(storage) if storage.type_.is_empty() => errors.invalid(
                Path::new("spec").child("deepStorage").child("type"),
                &name,
                "spec.deepStorage.type is missing",
            ),
            Some(_) => {}
        }

        match &self.spec.metadata_storage {
            None => errors.invalid(
                Path::new("spec").child("metadataStorage"),
                &name,
                "spec.metadataStorage is missing",
            ),
            Some(storage) if storage.name.is_empty() && storage.type_.is_none() => errors.invalid(
                Path::new("spec").child("metadataStorage").child("name"),
                &name,
                "spec.metadataStorage.type and spec.metadataStorage.name both can not be empty simultaneously",
            ),
            Some(_) => {}
        }

        match &self.spec.topology {
            Some(topology) => self.validate_topology(&mut errors, topology),
            None => errors.invalid(
                Path::new("spec").child("topology"),
                &name,
                "spec.topology can not be empty",
            ),
        }

        errors
    }

    /// druid clusters are always allowed to be deleted, the termination
    /// policy is applied by the operator
    fn validate_delete(&self) -> Result<(), Invalid> {
        Ok(())
    }

    fn default_auth_secret_name(&self) -> String {
        self.user_cred_secret_name(ADMIN_USER)
    }
}
