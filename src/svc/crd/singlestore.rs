//! # Singlestore module
//!
//! This module provide the singlestore custom resource and its definition. A
//! singlestore database is either a standalone node or a cluster made of
//! aggregator and leaf nodes, each node of a cluster runs a coordinator next to
//! the database.

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
        validate_storage_type, Database, DatabaseStatus, HealthCheckSpec, Kind, MonitorSpec,
        NamedServiceTemplateSpec, SecretReference, StorageType, TerminationPolicy, TlsConfig,
    },
    k8s::{
        field::{ErrorList, Invalid, Path},
        resource::requirements,
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "singlestore";
pub const INIT_CONTAINER_NAME: &str = "singlestore-init";
pub const COORDINATOR_CONTAINER_NAME: &str = "singlestore-coordinator";

pub const PORT: i32 = 3306;
pub const STUDIO_PORT: i32 = 8081;
pub const EXPORTER_PORT: i32 = 9104;

pub const SERVER_CERT: &str = "server";
pub const CLIENT_CERT: &str = "client";

pub const ROOT_USER: &str = "root";

pub const ROLE_AGGREGATOR: &str = "aggregator";
pub const ROLE_LEAF: &str = "leaf";

pub const RESERVED_VOLUMES: [&str; 4] = ["initial-script", "custom-config", "init-scripts", "data"];
pub const RESERVED_VOLUME_MOUNT_PATHS: [&str; 4] = [
    "/var/lib/memsql",
    "/scripts",
    "/etc/memsql/conf.d",
    "/docker-entrypoint-initdb.d",
];

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
    #[serde(rename = "storage", default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<PersistentVolumeClaimSpec>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Topology {
    #[serde(rename = "aggregator", default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<Node>,
    #[serde(rename = "leaf", default, skip_serializing_if = "Option::is_none")]
    pub leaf: Option<Node>,
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "Singlestore")]
#[kube(plural = "singlestores")]
#[kube(shortname = "sdb")]
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
        rename = "enableSSL",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub enable_ssl: bool,
    #[serde(rename = "tls", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(rename = "authSecret", default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<SecretReference>,
    #[serde(
        rename = "configSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub config_secret: Option<LocalObjectReference>,
    #[serde(
        rename = "licenseSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub license_secret: Option<SecretReference>,
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
    #[serde(rename = "halted", default, skip_serializing_if = "std::ops::Not::not")]
    pub halted: bool,
    #[serde(
        rename = "terminationPolicy",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub termination_policy: Option<TerminationPolicy>,
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

fn set_template_defaults(pod: &mut PodTemplateSpec, info: &VersionInfo, clustering: bool) {
    pod.set_security_context_defaults(CONTAINER_NAME, INIT_CONTAINER_NAME, info.run_as_user, true);
    pod.set_container_resources_defaults(CONTAINER_NAME, &requirements(".500", "1.5Gi", "1.5Gi"));
    pod.set_init_container_resources_defaults(
        INIT_CONTAINER_NAME,
        &template::default_init_container_resources(),
    );

    if clustering {
        template::restrict(
            pod.container_mut(COORDINATOR_CONTAINER_NAME)
                .security_context
                .get_or_insert_with(Default::default),
            info.run_as_user,
            true,
        );
        pod.set_container_resources_defaults(
            COORDINATOR_CONTAINER_NAME,
            &requirements(".200", "256Mi", "256Mi"),
        );
    }
}

// -----------------------------------------------------------------------------
// Singlestore implementation

impl Singlestore {
    pub fn is_standalone(&self) -> bool {
        self.spec.topology.is_none()
    }

    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn set_tls_defaults(&mut self) {
        let server = self.certificate_name(SERVER_CERT);
        let client = self.certificate_name(CLIENT_CERT);
        if let Some(tls) = self.spec.tls.as_mut().filter(|tls| tls.issuer_ref.is_some()) {
            tls.set_missing_secret_name(SERVER_CERT, server);
            tls.set_missing_secret_name(CLIENT_CERT, client);
        }
    }

    fn validate_ssl(&self, errors: &mut ErrorList) {
        let path = Path::new("spec").child("enableSSL");
        match (self.spec.enable_ssl, &self.spec.tls) {
            (true, None) => errors.invalid(
                path,
                self.spec.enable_ssl,
                ".spec.tls can't be nil, if .spec.enableSSL is true",
            ),
            (false, Some(_)) => errors.invalid(
                path,
                self.spec.enable_ssl,
                ".spec.tls must be nil, if .spec.enableSSL is disabled",
            ),
            _ => {}
        }
    }

    fn validate_template(&self, errors: &mut ErrorList, path: Path, template: &PodTemplateSpec) {
        let name = self.name_any();
        let path = path.child("podTemplate").child("spec");

        if let Err(err) = template.validate_volumes(&RESERVED_VOLUMES) {
            errors.invalid(path.child("volumes"), &name, err.reported_for(Self::KIND));
        }

        if let Err(err) = template.validate_volume_mount_paths(&RESERVED_VOLUME_MOUNT_PATHS) {
            errors.invalid(path.child("containers"), &name, err);
        }
    }

    fn validate_node(&self, errors: &mut ErrorList, role: &str, node: Option<&Node>, low: &str) {
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

        match node.replicas {
            None => errors.invalid(
                path.child("replicas"),
                &name,
                format!("doesn't support spec.topology.{}.replicas is set", role),
            ),
            Some(replicas) if replicas <= 0 => errors.invalid(path.child("replicas"), &name, low),
            Some(_) => {}
        }

        self.validate_template(errors, path, &node.pod_template);
    }
}

#[async_trait]
impl Database for Singlestore {
    const KIND: Kind = Kind::Singlestore;

    fn termination_policy(&self) -> Option<TerminationPolicy> {
        self.spec.termination_policy
    }

    fn termination_policy_path() -> Path {
        Path::new("spec").child("terminationPolicy")
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn set_defaults(&mut self, catalog: &dyn Catalog) {
        let name = self.name_any();

        self.spec.storage_type.get_or_insert(StorageType::Durable);
        self.spec.termination_policy.get_or_insert(TerminationPolicy::Delete);

        if !set_halt_policy(&mut self.spec.termination_policy, self.spec.halted, Self::KIND, &name) {
            return;
        }

        match &mut self.spec.topology {
            None => {
                self.spec.replicas.get_or_insert(1);
            }
            Some(topology) => {
                if let Some(aggregator) = &mut topology.aggregator {
                    aggregator.replicas.get_or_insert(3);
                }

                if let Some(leaf) = &mut topology.leaf {
                    leaf.replicas.get_or_insert(2);
                }
            }
        }

        let info = match default_version(catalog, Self::KIND, &self.spec.version, &name).await {
            Some(info) => info,
            None => return,
        };

        match &mut self.spec.topology {
            None => set_template_defaults(&mut self.spec.pod_template, &info, false),
            Some(topology) => {
                let nodes = [topology.aggregator.as_mut(), topology.leaf.as_mut()];
                for node in nodes.into_iter().flatten() {
                    set_template_defaults(&mut node.pod_template, &info, true);
                }
            }
        }

        self.set_tls_defaults();
        self.spec.health_checker.set_defaults(10, 10, 1);

        if let Some(monitor) = &mut self.spec.monitor {
            monitor.set_defaults(EXPORTER_PORT, info.run_as_user);
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn validate_create_or_update(&self, catalog: &dyn Catalog) -> ErrorList {
        let name = self.name_any();
        let mut errors = ErrorList::default();

        self.validate_ssl(&mut errors);

        if let Err(err) = lookup_version(catalog, Self::KIND, &self.spec.version, &name).await {
            errors.push(err);
        }

        match &self.spec.topology {
            None => {
                if self.spec.replicas != Some(1) {
                    errors.invalid(
                        Path::new("spec").child("replicas"),
                        &name,
                        "number of replicas for standalone must be one ",
                    );
                }

                self.validate_template(&mut errors, Path::new("spec"), &self.spec.pod_template);
            }
            Some(topology) => {
                self.validate_node(
                    &mut errors,
                    ROLE_AGGREGATOR,
                    topology.aggregator.as_ref(),
                    "number of replicas can not be less be 0 or less",
                );
                self.validate_node(
                    &mut errors,
                    ROLE_LEAF,
                    topology.leaf.as_ref(),
                    "number of replicas can not be 0 or less",
                );
            }
        }

        validate_storage_type(
            &mut errors,
            Path::new("spec").child("storageType"),
            &name,
            self.spec.storage_type.as_ref(),
        );

        errors
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(old, catalog)))]
    async fn validate_update(&self, old: &Self, catalog: &dyn Catalog) -> Result<(), Invalid> {
        let mut errors = self.validate_create_or_update(catalog).await;

        let scaled_up = self.is_standalone()
            && old.spec.replicas == Some(1)
            && self.spec.replicas.map(|r| r > 1).unwrap_or(false);

        if scaled_up {
            errors.invalid(
                Path::new("spec").child("replicas"),
                self.name_any(),
                "Cannot scale up from 1 to more than 1 in standalone mode",
            );
        }

        self.invalid(errors)
    }

    fn default_auth_secret_name(&self) -> String {
        format!("{}-{}-cred", self.offshoot_name(), ROOT_USER)
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Container, TypedLocalObjectReference, Volume, VolumeMount};
    use kube::core::ObjectMeta;

    use super::*;
    use crate::svc::{catalog::StaticCatalog, crd::template::PodSpec};

    fn singlestore(spec: Spec) -> Singlestore {
        let mut sdb = Singlestore::new("sdb", spec);
        sdb.metadata = ObjectMeta {
            name: Some("sdb".to_owned()),
            namespace: Some("demo".to_owned()),
            ..Default::default()
        };
        sdb
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::default().with(Kind::Singlestore, "8.7.10", Some(998))
    }

    #[tokio::test]
    async fn cluster_defaults_are_applied() {
        let mut sdb = singlestore(Spec {
            version: "8.7.10".to_owned(),
            topology: Some(Topology {
                aggregator: Some(Node::default()),
                leaf: Some(Node::default()),
            }),
            enable_ssl: true,
            tls: Some(TlsConfig {
                issuer_ref: Some(TypedLocalObjectReference {
                    api_group: Some("cert-manager.io".to_owned()),
                    kind: "Issuer".to_owned(),
                    name: "sdb-ca".to_owned(),
                }),
                ..Default::default()
            }),
            monitor: Some(MonitorSpec::default()),
            ..Default::default()
        });

        sdb.set_defaults(&catalog()).await;

        assert_eq!(Some(StorageType::Durable), sdb.spec.storage_type);
        assert_eq!(Some(TerminationPolicy::Delete), sdb.spec.termination_policy);
        assert_eq!(None, sdb.spec.replicas);

        let topology = sdb.spec.topology.as_ref().expect("topology to be kept");
        let aggregator = topology.aggregator.as_ref().expect("aggregator to be kept");
        let leaf = topology.leaf.as_ref().expect("leaf to be kept");
        assert_eq!(Some(3), aggregator.replicas);
        assert_eq!(Some(2), leaf.replicas);

        let names: Vec<_> = leaf
            .pod_template
            .spec
            .containers
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(vec![CONTAINER_NAME, COORDINATOR_CONTAINER_NAME], names);
        assert_eq!(
            Some(requirements(".500", "1.5Gi", "1.5Gi")),
            leaf.pod_template.spec.containers[0].resources
        );
        assert_eq!(
            Some(requirements(".200", "256Mi", "256Mi")),
            leaf.pod_template.spec.containers[1].resources
        );
        assert_eq!(
            Some(998),
            aggregator
                .pod_template
                .spec
                .security_context
                .as_ref()
                .and_then(|ctx| ctx.fs_group)
        );

        let tls = sdb.spec.tls.as_ref().expect("tls to be kept");
        assert_eq!(Some("sdb-server-cert"), tls.secret_name(SERVER_CERT));
        assert_eq!(Some("sdb-client-cert"), tls.secret_name(CLIENT_CERT));
        assert_eq!(Some(10), sdb.spec.health_checker.period_seconds);
        assert_eq!("sdb-root-cred", sdb.default_auth_secret_name());

        assert_eq!(Ok(()), sdb.validate_create(&catalog()).await);
    }

    #[tokio::test]
    async fn standalone_defaults_skip_the_coordinator() {
        let mut sdb = singlestore(Spec {
            version: "8.7.10".to_owned(),
            ..Default::default()
        });

        sdb.set_defaults(&catalog()).await;

        assert_eq!(Some(1), sdb.spec.replicas);
        let names: Vec<_> = sdb
            .spec
            .pod_template
            .spec
            .containers
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(vec![CONTAINER_NAME], names);
        assert_eq!(INIT_CONTAINER_NAME, sdb.spec.pod_template.spec.init_containers[0].name);
        assert_eq!(Ok(()), sdb.validate_create(&catalog()).await);
    }

    #[tokio::test]
    async fn errors_are_accumulated() {
        let sdb = singlestore(Spec {
            version: "8.7.10".to_owned(),
            enable_ssl: true,
            storage_type: Some(StorageType::Unknown("Shared".to_owned())),
            topology: Some(Topology {
                aggregator: Some(Node {
                    replicas: Some(0),
                    pod_template: PodTemplateSpec {
                        spec: PodSpec {
                            volumes: vec![Volume {
                                name: "data".to_owned(),
                                ..Default::default()
                            }],
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                    ..Default::default()
                }),
                leaf: None,
            }),
            ..Default::default()
        });

        let errors = sdb.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.detail))
            .collect();

        assert_eq!(
            vec![
                "spec.enableSSL: .spec.tls can't be nil, if .spec.enableSSL is true",
                "spec.topology.aggregator.replicas: number of replicas can not be less be 0 or less",
                "spec.topology.aggregator.podTemplate.spec.volumes: Can't use a reserve volume name: data",
                "spec.topology.leaf: .spec.topology.leaf can't be empty in cluster mode",
                "spec.storageType: StorageType should be either durable or ephemeral",
            ],
            details
        );
    }

    #[tokio::test]
    async fn standalone_template_is_checked() {
        let sdb = singlestore(Spec {
            version: "8.7.10".to_owned(),
            replicas: Some(1),
            storage_type: Some(StorageType::Durable),
            tls: Some(TlsConfig::default()),
            pod_template: PodTemplateSpec {
                spec: PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_owned(),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "conf".to_owned(),
                            mount_path: "/etc/memsql/conf.d".to_owned(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        });

        let errors = sdb.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.detail))
            .collect();

        assert_eq!(
            vec![
                "spec.enableSSL: .spec.tls must be nil, if .spec.enableSSL is disabled",
                "spec.podTemplate.spec.containers: Can't use a reserve volume mount path name: /etc/memsql/conf.d",
            ],
            details
        );
    }

    #[tokio::test]
    async fn standalone_can_not_be_scaled_up() {
        let old = singlestore(Spec {
            version: "8.7.10".to_owned(),
            replicas: Some(1),
            storage_type: Some(StorageType::Durable),
            ..Default::default()
        });

        let mut new = old.to_owned();
        new.spec.replicas = Some(3);

        let err = new
            .validate_update(&old, &catalog())
            .await
            .expect_err("scaling up a standalone to be refused");

        let details: Vec<_> = err.errors.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(
            vec![
                "number of replicas for standalone must be one ",
                "Cannot scale up from 1 to more than 1 in standalone mode",
            ],
            details
        );

        assert_eq!(Ok(()), old.validate_update(&old, &catalog()).await);
    }
}
