//! # Solr module
//!
//! This module provide the solr custom resource and its definition, a solr
//! cloud is either made of combined nodes or of dedicated overseer, data and
//! coordinator nodes. It relies on a zookeeper ensemble.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LocalObjectReference, PersistentVolumeClaimSpec};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::{
    catalog::{Catalog, VersionInfo},
    crd::{
        default_version, lookup_version,
        template::{self, PodTemplateSpec},
        validate_pod_template, validate_storage_type, Database, DatabaseStatus, HealthCheckSpec,
        Kind, MonitorSpec, NamedServiceTemplateSpec, StorageType, TerminationPolicy, TlsConfig,
    },
    k8s::{
        field::{ErrorList, Path},
        resource::requirements,
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "solr";
pub const INIT_CONTAINER_NAME: &str = "init-solr";

pub const REST_PORT: i32 = 8983;
pub const EXPORTER_PORT: i32 = 9854;

pub const SERVER_CERT: &str = "server";
pub const CLIENT_CERT: &str = "client";

pub const ROLE_OVERSEER: &str = "overseer";
pub const ROLE_DATA: &str = "data";
pub const ROLE_COORDINATOR: &str = "coordinator";

pub const DEFAULT_ZOOKEEPER_VERSION: &str = "3.7.2";

pub const RESERVED_VOLUMES: [&str; 4] = ["slconfig", "default-config", "custom-config", "auth-config"];
pub const RESERVED_VOLUME_MOUNT_PATHS: [&str; 5] = [
    "/var/solr",
    "/var/solr/data",
    "/custom-config",
    "/var/security",
    "/temp-config",
];

pub const AVAILABLE_MODULES: [&str; 16] = [
    "analysis-extras",
    "extraction",
    "hdfs",
    "langid",
    "prometheus-exporter",
    "sql",
    "analytics",
    "gcs-repository",
    "jaegertracer-configurator",
    "ltr",
    "s3-repository",
    "clustering",
    "hadoop-auth",
    "jwt-auth",
    "opentelemetry",
    "scripting",
];

/// resources given to a solr container that does not request any, solr is
/// both cpu and memory intensive
pub fn default_resources() -> k8s_openapi::api::core::v1::ResourceRequirements {
    requirements(".900", "2Gi", "2Gi")
}

// -----------------------------------------------------------------------------
// ZooKeeperRef structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ZooKeeperRef {
    #[serde(rename = "name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "namespace", default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
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
    #[serde(rename = "storage", default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<PersistentVolumeClaimSpec>,
    #[serde(
        rename = "podTemplate",
        default,
        skip_serializing_if = "PodTemplateSpec::is_empty"
    )]
    pub pod_template: PodTemplateSpec,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Topology {
    #[serde(rename = "overseer", default, skip_serializing_if = "Option::is_none")]
    pub overseer: Option<Node>,
    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Node>,
    #[serde(rename = "coordinator", default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<Node>,
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "Solr")]
#[kube(plural = "solrs")]
#[kube(shortname = "sl")]
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
    #[serde(rename = "topology", default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,
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
        rename = "zookeeperRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub zookeeper_ref: Option<ZooKeeperRef>,
    #[serde(rename = "solrModules", default, skip_serializing_if = "Vec::is_empty")]
    pub solr_modules: Vec<String>,
    #[serde(rename = "solrOpts", default, skip_serializing_if = "Vec::is_empty")]
    pub solr_opts: Vec<String>,
    #[serde(
        rename = "enableSSL",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub enable_ssl: bool,
    #[serde(
        rename = "clientAuthSSL",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub client_auth_ssl: String,
    #[serde(rename = "tls", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(
        rename = "disableSecurity",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub disable_security: bool,
    #[serde(
        rename = "configSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub config_secret: Option<LocalObjectReference>,
    #[serde(
        rename = "keystoreSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub keystore_secret: Option<LocalObjectReference>,
    #[serde(rename = "authSecret", default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<LocalObjectReference>,
    #[serde(
        rename = "zookeeperDigestSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub zookeeper_digest_secret: Option<LocalObjectReference>,
    #[serde(
        rename = "zookeeperDigestReadonlySecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub zookeeper_digest_readonly_secret: Option<LocalObjectReference>,
    #[serde(
        rename = "authConfigSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_config_secret: Option<LocalObjectReference>,
    #[serde(
        rename = "podTemplate",
        default,
        skip_serializing_if = "PodTemplateSpec::is_empty"
    )]
    pub pod_template: PodTemplateSpec,
    #[serde(
        rename = "serviceTemplates",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub service_templates: Vec<NamedServiceTemplateSpec>,
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
    #[serde(rename = "monitor", default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSpec>,
}

// -----------------------------------------------------------------------------
// Helpers

fn secret(name: String) -> Option<LocalObjectReference> {
    Some(LocalObjectReference { name: Some(name) })
}

fn set_template_defaults(pod: &mut PodTemplateSpec, info: &VersionInfo) {
    pod.set_security_context_defaults(CONTAINER_NAME, INIT_CONTAINER_NAME, info.run_as_user, false);
    pod.set_container_resources_defaults(CONTAINER_NAME, &default_resources());
    pod.set_init_container_resources_defaults(
        INIT_CONTAINER_NAME,
        &template::default_init_container_resources(),
    );
}

fn set_node_defaults(node: &mut Node, role: &str, info: &VersionInfo) {
    if node.suffix.is_empty() {
        node.suffix = role.to_owned();
    }

    node.replicas.get_or_insert(1);
    set_template_defaults(&mut node.pod_template, info);
}

// -----------------------------------------------------------------------------
// Solr implementation

impl Solr {
    pub fn zookeeper_name(&self) -> String {
        format!("{}-zk", self.offshoot_name())
    }

    pub fn secret_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.offshoot_name(), suffix)
    }

    /// returns the count of stateful sets expected for this solr cloud
    pub fn expected_stateful_sets(&self) -> usize {
        match self.spec.topology {
            Some(_) => 3,
            None => 1,
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

    fn validate_node(
        &self,
        errors: &mut ErrorList,
        role: &str,
        node: Option<&Node>,
    ) {
        let name = self.name_any();
        let path = Path::new("spec").child("topology").child(role);
        let node = match node {
            Some(node) => node,
            None => {
                errors.invalid(
                    path,
                    &name,
                    format!(".spec.topology.{} can't be empty in cluster mode", role),
                );
                return;
            }
        };

        if node.replicas.map(|r| r <= 0).unwrap_or(false) {
            errors.invalid(
                path.child("replicas"),
                &name,
                "number of replicas can not be 0 or less",
            );
        }

        validate_pod_template(
            errors,
            Self::KIND,
            &path.child("podTemplate"),
            &name,
            &node.pod_template,
            &RESERVED_VOLUMES,
            &RESERVED_VOLUME_MOUNT_PATHS,
        );
    }
}

#[async_trait]
impl Database for Solr {
    const KIND: Kind = Kind::Solr;

    fn termination_policy(&self) -> Option<TerminationPolicy> {
        self.spec.deletion_policy
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn set_defaults(&mut self, catalog: &dyn Catalog) {
        let name = self.name_any();

        self.spec.deletion_policy.get_or_insert(TerminationPolicy::Delete);
        if self.spec.client_auth_ssl != "need" && self.spec.client_auth_ssl != "want" {
            self.spec.client_auth_ssl = String::new();
        }

        self.spec.storage_type.get_or_insert(StorageType::Durable);
        self.set_zookeeper_ref_defaults();

        if self.spec.zookeeper_digest_secret.is_none() {
            self.spec.zookeeper_digest_secret = secret(self.secret_name("zk-digest"));
        }

        if self.spec.zookeeper_digest_readonly_secret.is_none() {
            self.spec.zookeeper_digest_readonly_secret =
                secret(self.secret_name("zk-digest-readonly"));
        }

        if self.spec.auth_config_secret.is_none() {
            self.spec.auth_config_secret = secret(self.secret_name("auth-config"));
        }

        let server = self.certificate_name(SERVER_CERT);
        let client = self.certificate_name(CLIENT_CERT);
        if let Some(tls) = self.spec.tls.as_mut().filter(|tls| tls.issuer_ref.is_some()) {
            tls.set_missing_secret_name(SERVER_CERT, server);
            tls.set_missing_secret_name(CLIENT_CERT, client);
        }

        self.spec.health_checker.set_defaults(20, 10, 3);

        let info = match default_version(catalog, Self::KIND, &self.spec.version, &name).await {
            Some(info) => info,
            None => return,
        };

        match &mut self.spec.topology {
            Some(topology) => {
                if let Some(node) = &mut topology.data {
                    set_node_defaults(node, ROLE_DATA, &info);
                }

                if let Some(node) = &mut topology.overseer {
                    set_node_defaults(node, ROLE_OVERSEER, &info);
                }

                if let Some(node) = &mut topology.coordinator {
                    set_node_defaults(node, ROLE_COORDINATOR, &info);
                }
            }
            None => {
                self.spec.replicas.get_or_insert(1);
                set_template_defaults(&mut self.spec.pod_template, &info);
            }
        }

        if let Some(monitor) = &mut self.spec.monitor {
            monitor.set_defaults(EXPORTER_PORT, info.run_as_user);
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn validate_create_or_update(&self, catalog: &dyn Catalog) -> ErrorList {
        let name = self.name_any();
        let mut errors = ErrorList::default();

        if self.spec.enable_ssl && self.spec.tls.is_none() {
            errors.invalid(
                Path::new("spec").child("enableSSL"),
                &name,
                ".spec.tls can't be nil, if .spec.enableSSL is true",
            );
        }

        if !self.spec.enable_ssl && self.spec.tls.is_some() {
            errors.invalid(
                Path::new("spec").child("enableSSL"),
                &name,
                ".spec.tls must be nil, if .spec.enableSSL is disabled",
            );
        }

        if let Err(err) = lookup_version(catalog, Self::KIND, &self.spec.version, &name).await {
            errors.push(err);
        }

        if let Some(module) = self
            .spec
            .solr_modules
            .iter()
            .find(|module| !AVAILABLE_MODULES.contains(&module.as_str()))
        {
            errors.invalid(
                Path::new("spec").child("solrModules"),
                &name,
                format!("{} does not exist in available modules", module),
            );
        }

        match &self.spec.topology {
            None => {
                if self.spec.replicas.map(|r| r <= 0).unwrap_or(false) {
                    errors.invalid(
                        Path::new("spec").child("replicas"),
                        &name,
                        "number of replicas can not be 0 or less",
                    );
                }

                validate_pod_template(
                    &mut errors,
                    Self::KIND,
                    &Path::new("spec").child("podTemplate"),
                    &name,
                    &self.spec.pod_template,
                    &RESERVED_VOLUMES,
                    &RESERVED_VOLUME_MOUNT_PATHS,
                );
            }
            Some(topology) => {
                self.validate_node(&mut errors, ROLE_DATA, topology.data.as_ref());
                self.validate_node(&mut errors, ROLE_OVERSEER, topology.overseer.as_ref());
                self.validate_node(&mut errors, ROLE_COORDINATOR, topology.coordinator.as_ref());
            }
        }

        validate_storage_type(
            &mut errors,
            Path::new("spec").child("storageType"),
            &name,
            self.spec.storage_type.as_ref(),
        );

        for opt in &self.spec.solr_opts {
            if opt.contains(' ') {
                errors.invalid(
                    Path::new("spec").child("solrOpts"),
                    &name,
                    "solropt jvm env variables must not contain space",
                );
            }

            if !opt.starts_with("-D") {
                errors.invalid(
                    Path::new("spec").child("solrOpts"),
                    &name,
                    "solropt jvm env variables must start with -D",
                );
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Volume;
    use kube::core::ObjectMeta;

    use super::*;
    use crate::svc::{catalog::StaticCatalog, crd::template::PodSpec};

    fn solr(spec: Spec) -> Solr {
        let mut sl = Solr::new("sl", spec);
        sl.metadata = ObjectMeta {
            name: Some("sl".to_owned()),
            namespace: Some("demo".to_owned()),
            ..Default::default()
        };
        sl
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::default().with(Kind::Solr, "9.4.1", Some(8983))
    }

    #[tokio::test]
    async fn defaults_are_applied() {
        let mut sl = solr(Spec {
            version: "9.4.1".to_owned(),
            client_auth_ssl: "maybe".to_owned(),
            monitor: Some(MonitorSpec::default()),
            ..Default::default()
        });

        sl.set_defaults(&catalog()).await;

        assert_eq!(Some(TerminationPolicy::Delete), sl.spec.deletion_policy);
        assert_eq!("", sl.spec.client_auth_ssl);
        assert_eq!(Some(1), sl.spec.replicas);
        assert_eq!(
            Some(ZooKeeperRef {
                name: "sl-zk".to_owned(),
                namespace: "demo".to_owned(),
                externally_managed: false,
                version: Some(DEFAULT_ZOOKEEPER_VERSION.to_owned()),
            }),
            sl.spec.zookeeper_ref
        );
        assert_eq!(secret("sl-zk-digest".to_owned()), sl.spec.zookeeper_digest_secret);
        assert_eq!(
            secret("sl-zk-digest-readonly".to_owned()),
            sl.spec.zookeeper_digest_readonly_secret
        );
        assert_eq!(secret("sl-auth-config".to_owned()), sl.spec.auth_config_secret);

        let pod = &sl.spec.pod_template.spec;
        assert_eq!(Some(default_resources()), pod.containers[0].resources);
        assert_eq!(
            Some(template::default_init_container_resources()),
            pod.init_containers[0].resources
        );
        assert_eq!(
            Some(EXPORTER_PORT),
            sl.spec
                .monitor
                .as_ref()
                .and_then(|m| m.prometheus.as_ref())
                .and_then(|p| p.exporter.port)
        );

        assert_eq!(Ok(()), sl.validate_create(&catalog()).await);
    }

    #[tokio::test]
    async fn topology_nodes_are_defaulted() {
        let mut sl = solr(Spec {
            version: "9.4.1".to_owned(),
            zookeeper_ref: Some(ZooKeeperRef {
                name: "shared-zk".to_owned(),
                externally_managed: true,
                ..Default::default()
            }),
            topology: Some(Topology {
                overseer: Some(Node::default()),
                data: Some(Node {
                    replicas: Some(3),
                    ..Default::default()
                }),
                coordinator: Some(Node::default()),
            }),
            ..Default::default()
        });

        sl.set_defaults(&catalog()).await;

        let topology = sl.spec.topology.as_ref().expect("topology to be kept");
        let data = topology.data.as_ref().expect("data node to be kept");
        assert_eq!(ROLE_DATA, data.suffix);
        assert_eq!(Some(3), data.replicas);
        assert!(!data.pod_template.is_empty());
        assert_eq!(None, sl.spec.replicas);
        assert_eq!(3, sl.expected_stateful_sets());

        let zookeeper = sl.spec.zookeeper_ref.as_ref().expect("zookeeper reference");
        assert_eq!("shared-zk", zookeeper.name);
        assert!(zookeeper.externally_managed);

        assert_eq!(Ok(()), sl.validate_create(&catalog()).await);
    }

    #[tokio::test]
    async fn missing_topology_members_are_reported() {
        let sl = solr(Spec {
            version: "9.4.1".to_owned(),
            storage_type: Some(StorageType::Durable),
            topology: Some(Topology {
                data: Some(Node {
                    replicas: Some(0),
                    pod_template: PodTemplateSpec {
                        spec: PodSpec {
                            volumes: vec![Volume {
                                name: "auth-config".to_owned(),
                                ..Default::default()
                            }],
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        let errors = sl.validate_create_or_update(&catalog()).await;
        let found: Vec<_> = errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.detail))
            .collect();

        assert_eq!(
            vec![
                "spec.topology.data.replicas: number of replicas can not be 0 or less",
                "spec.topology.data.podTemplate.spec.volumes: Can't use a reserve volume name: auth-config",
                "spec.topology.overseer: .spec.topology.overseer can't be empty in cluster mode",
                "spec.topology.coordinator: .spec.topology.coordinator can't be empty in cluster mode",
            ],
            found
        );
    }

    #[tokio::test]
    async fn modules_and_jvm_options_are_checked() {
        let sl = solr(Spec {
            version: "9.4.1".to_owned(),
            storage_type: Some(StorageType::Durable),
            solr_modules: vec!["s3-repository".to_owned(), "nosql".to_owned()],
            solr_opts: vec![
                "-Dsolr.autoSoftCommit.maxTime=1000".to_owned(),
                "-Xms 2g".to_owned(),
            ],
            ..Default::default()
        });

        let errors = sl.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors.iter().map(|e| e.detail.as_str()).collect();

        assert_eq!(
            vec![
                "nosql does not exist in available modules",
                "solropt jvm env variables must not contain space",
                "solropt jvm env variables must start with -D",
            ],
            details
        );
    }
}
