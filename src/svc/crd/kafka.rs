//! # Kafka module
//!
//! This module provide the kafka custom resource and its definition, a kafka
//! cluster is either made of combined nodes or of dedicated controller and
//! broker nodes.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, ResourceRequirements};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::{
    catalog::Catalog,
    crd::{
        lookup_version,
        template::{self, PodTemplateSpec},
        validate_pod_template, validate_storage_type, Database, DatabaseStatus, HealthCheckSpec,
        Kind, MonitorSpec, NamedServiceTemplateSpec, SecretReference, StorageType,
        TerminationPolicy, TlsConfig,
    },
    k8s::{
        field::{ErrorList, Path},
        resource,
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "kafka";

pub const REST_PORT: i32 = 9092;
pub const CONTROLLER_PORT: i32 = 9093;
pub const LOCAL_PORT: i32 = 29092;
pub const EXPORTER_PORT: i32 = 56790;

pub const SERVER_CERT: &str = "server";
pub const CLIENT_CERT: &str = "client";

pub const ROLE_CONTROLLER: &str = "controller";
pub const ROLE_BROKER: &str = "broker";

pub const RESERVED_VOLUMES: [&str; 3] = ["data", "kafkaconfig", "temp-config"];
pub const RESERVED_VOLUME_MOUNT_PATHS: [&str; 5] = [
    "/opt/kafka/config/kafkaconfig",
    "/opt/kafka/config/temp-config",
    "/var/log/kafka",
    "/var/log/kafka/metadata",
    "/var/private/ssl",
];

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
    #[serde(rename = "resources", default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

impl Node {
    fn set_defaults(&mut self, role: &str) {
        if self.suffix.is_empty() {
            self.suffix = role.to_owned();
        }

        self.replicas.get_or_insert(1);
        resource::set_default_resource_limits(
            self.resources.get_or_insert_with(Default::default),
            &template::default_resources(),
        );
    }
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Topology {
    #[serde(rename = "controller", default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<Node>,
    #[serde(rename = "broker", default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<Node>,
}

impl Topology {
    /// returns the declared nodes along with their role
    pub fn nodes(&self) -> Vec<(&'static str, &Node)> {
        let mut nodes = vec![];
        if let Some(node) = &self.controller {
            nodes.push((ROLE_CONTROLLER, node));
        }

        if let Some(node) = &self.broker {
            nodes.push((ROLE_BROKER, node));
        }

        nodes
    }
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "Kafka")]
#[kube(plural = "kafkas")]
#[kube(shortname = "kf")]
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
    #[serde(
        rename = "disableSecurity",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub disable_security: bool,
    #[serde(rename = "authSecret", default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<SecretReference>,
    #[serde(
        rename = "keystoreCredSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub keystore_cred_secret: Option<SecretReference>,
    #[serde(rename = "tls", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
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
// Kafka implementation

impl Kafka {
    /// returns the name of the stateful set running the nodes of the role
    pub fn stateful_set_name(&self, role: &str) -> String {
        let suffix = self
            .spec
            .topology
            .as_ref()
            .and_then(|topology| match role {
                ROLE_CONTROLLER => topology.controller.as_ref(),
                _ => topology.broker.as_ref(),
            })
            .map(|node| node.suffix.to_owned())
            .unwrap_or_else(|| role.to_owned());

        format!("{}-{}", self.offshoot_name(), suffix)
    }

    /// returns the reserved volume names, certificates are mounted from a
    /// volume named after their alias
    pub fn reserved_volumes(&self) -> Vec<String> {
        let mut volumes: Vec<_> = RESERVED_VOLUMES.iter().map(ToString::to_string).collect();
        if let Some(tls) = &self.spec.tls {
            volumes.extend(
                tls.certificates
                    .iter()
                    .map(|certificate| self.cert_secret_volume_name(&certificate.alias)),
            );
        }

        volumes
    }

    fn validate_topology(&self, topology: &Topology, errors: &mut ErrorList) {
        let name = self.name_any();
        let path = Path::new("spec").child("topology");

        if topology.controller.is_none() {
            errors.invalid(
                path.child(ROLE_CONTROLLER),
                &name,
                ".spec.topology.controller can't be empty in topology cluster",
            );
        }

        if topology.broker.is_none() {
            errors.invalid(
                path.child(ROLE_BROKER),
                &name,
                ".spec.topology.broker can't be empty in topology cluster",
            );
        }

        if self.spec.replicas.is_some() {
            errors.invalid(
                Path::new("spec").child("replicas"),
                &name,
                "doesn't support spec.replicas when spec.topology is set",
            );
        }

        if self.spec.storage.is_some() {
            errors.invalid(
                Path::new("spec").child("storage"),
                &name,
                "doesn't support spec.storage when spec.topology is set",
            );
        }

        if let Some(resources) = &self.spec.pod_template.spec.resources {
            if !resource::is_unset(resources) {
                errors.invalid(
                    Path::new("spec")
                        .child("podTemplate")
                        .child("spec")
                        .child("resources"),
                    &name,
                    "doesn't support spec.podTemplate.spec.resources when spec.topology is set",
                );
            }
        }

        let nodes = topology.nodes();
        for (role, node) in &nodes {
            if node.replicas.map(|r| r <= 0).unwrap_or(false) {
                errors.invalid(
                    path.child(role).child("replicas"),
                    &name,
                    "number of replicas can not be 0 or less",
                );
            }
        }

        if let [(_, controller), (_, broker)] = nodes.as_slice() {
            if controller.suffix == broker.suffix {
                errors.invalid(path.to_owned(), &name, "two or more node cannot have same suffix");
            }
        }

        if let Some((role, _)) = nodes
            .iter()
            .find(|(_, node)| node.replicas.map(|r| r <= 0).unwrap_or(false))
        {
            errors.invalid(
                path,
                &name,
                format!("replicas for node role {} must be at least 1", role),
            );
        }
    }
}

#[async_trait]
impl Database for Kafka {
    const KIND: Kind = Kind::Kafka;

    fn termination_policy(&self) -> Option<TerminationPolicy> {
        self.spec.termination_policy
    }

    fn termination_policy_path() -> Path {
        Path::new("spec").child("terminationPolicy")
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(_catalog)))]
    async fn set_defaults(&mut self, _catalog: &dyn Catalog) {
        self.spec.termination_policy.get_or_insert(TerminationPolicy::Delete);
        self.spec.storage_type.get_or_insert(StorageType::Durable);

        match &mut self.spec.topology {
            Some(topology) => {
                if let Some(node) = &mut topology.controller {
                    node.set_defaults(ROLE_CONTROLLER);
                }

                if let Some(node) = &mut topology.broker {
                    node.set_defaults(ROLE_BROKER);
                }
            }
            None => {
                resource::set_default_resource_limits(
                    self.spec
                        .pod_template
                        .spec
                        .resources
                        .get_or_insert_with(Default::default),
                    &template::default_resources(),
                );
                self.spec.replicas.get_or_insert(1);
            }
        }

        if self.spec.enable_ssl {
            let server = self.certificate_name(SERVER_CERT);
            let client = self.certificate_name(CLIENT_CERT);
            if let Some(tls) = self.spec.tls.as_mut().filter(|tls| tls.issuer_ref.is_some()) {
                tls.set_missing_secret_name(SERVER_CERT, server);
                tls.set_missing_secret_name(CLIENT_CERT, client);
            }
        }

        self.spec.health_checker.set_defaults(20, 10, 3);

        if let Some(monitor) = &mut self.spec.monitor {
            monitor.set_defaults(EXPORTER_PORT, None);
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn validate_create_or_update(&self, catalog: &dyn Catalog) -> ErrorList {
        let name = self.name_any();
        let mut errors = ErrorList::default();

        match &self.spec.topology {
            Some(topology) => self.validate_topology(topology, &mut errors),
            None => {
                if self.spec.replicas.map(|r| r <= 0).unwrap_or(false) {
                    errors.invalid(
                        Path::new("spec").child("replicas"),
                        &name,
                        "number of replicas can not be 0 or less",
                    );
                }
            }
        }

        if let Err(err) = lookup_version(catalog, Self::KIND, &self.spec.version, &name).await {
            errors.push(err);
        }

        validate_pod_template(
            &mut errors,
            Self::KIND,
            &Path::new("spec").child("podTemplate"),
            &name,
            &self.spec.pod_template,
            &self.reserved_volumes(),
            &RESERVED_VOLUME_MOUNT_PATHS,
        );

        validate_storage_type(
            &mut errors,
            Path::new("spec").child("storageType"),
            &name,
            self.spec.storage_type.as_ref(),
        );

        errors
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::VolumeMount;
    use kube::core::ObjectMeta;

    use super::*;
    use crate::svc::{
        catalog::StaticCatalog,
        crd::template::PodSpec,
        k8s::resource::{requirements, MEMORY},
    };

    fn kafka(spec: Spec) -> Kafka {
        let mut kf = Kafka::new("kf", spec);
        kf.metadata = ObjectMeta {
            name: Some("kf".to_owned()),
            namespace: Some("demo".to_owned()),
            ..Default::default()
        };
        kf
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::default().with(Kind::Kafka, "3.6.1", Some(1001))
    }

    #[tokio::test]
    async fn combined_defaults_are_applied() {
        let mut kf = kafka(Spec {
            version: "3.6.1".to_owned(),
            ..Default::default()
        });

        kf.set_defaults(&catalog()).await;

        assert_eq!(Some(1), kf.spec.replicas);
        assert_eq!(Some(TerminationPolicy::Delete), kf.spec.termination_policy);
        assert_eq!(Some(StorageType::Durable), kf.spec.storage_type);
        assert_eq!(Some(20), kf.spec.health_checker.period_seconds);
        assert_eq!(
            Some(template::default_resources()),
            kf.spec.pod_template.spec.resources
        );
        assert_eq!(Ok(()), kf.validate_create(&catalog()).await);
    }

    #[tokio::test]
    async fn topology_defaults_are_applied() {
        let mut kf = kafka(Spec {
            version: "3.6.1".to_owned(),
            topology: Some(Topology {
                controller: Some(Node::default()),
                broker: Some(Node {
                    suffix: "data".to_owned(),
                    resources: Some(ResourceRequirements {
                        limits: Some([(MEMORY.to_owned(), resource_quantity("2Gi"))].into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        });

        kf.set_defaults(&catalog()).await;

        let topology = kf.spec.topology.as_ref().expect("topology to be kept");
        let controller = topology.controller.as_ref().expect("controller to be kept");
        let broker = topology.broker.as_ref().expect("broker to be kept");

        assert_eq!(None, kf.spec.replicas);
        assert_eq!("controller", controller.suffix);
        assert_eq!(Some(1), controller.replicas);
        assert_eq!(Some(template::default_resources()), controller.resources);
        assert_eq!("data", broker.suffix);
        assert_eq!(
            Some(&resource_quantity("1024Mi")),
            broker
                .resources
                .as_ref()
                .and_then(|r| r.requests.as_ref())
                .and_then(|r| r.get(MEMORY))
        );
        assert_eq!("kf-data", kf.stateful_set_name(ROLE_BROKER));
        assert_eq!(Ok(()), kf.validate_create(&catalog()).await);
    }

    #[tokio::test]
    async fn topology_conflicts_are_refused() {
        let kf = kafka(Spec {
            version: "3.6.1".to_owned(),
            replicas: Some(3),
            storage_type: Some(StorageType::Ephemeral),
            storage: Some(PersistentVolumeClaimSpec::default()),
            topology: Some(Topology {
                controller: None,
                broker: Some(Node {
                    replicas: Some(0),
                    suffix: "broker".to_owned(),
                    ..Default::default()
                }),
            }),
            pod_template: PodTemplateSpec {
                spec: PodSpec {
                    resources: Some(requirements("1", "1Gi", "1Gi")),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        });

        let errors = kf.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors.iter().map(|e| e.detail.as_str()).collect();

        assert_eq!(
            vec![
                ".spec.topology.controller can't be empty in topology cluster",
                "doesn't support spec.replicas when spec.topology is set",
                "doesn't support spec.storage when spec.topology is set",
                "doesn't support spec.podTemplate.spec.resources when spec.topology is set",
                "number of replicas can not be 0 or less",
                "replicas for node role broker must be at least 1",
            ],
            details
        );
    }

    #[tokio::test]
    async fn node_suffixes_must_be_unique() {
        let node = Node {
            replicas: Some(1),
            suffix: "node".to_owned(),
            ..Default::default()
        };

        let kf = kafka(Spec {
            version: "3.6.1".to_owned(),
            storage_type: Some(StorageType::Durable),
            topology: Some(Topology {
                controller: Some(node.to_owned()),
                broker: Some(node),
            }),
            ..Default::default()
        });

        let err = kf
            .validate_create(&catalog())
            .await
            .expect_err("duplicated suffixes to be refused");

        assert_eq!(
            r#"Kafka.kubedb.com "kf" is invalid: spec.topology: Invalid value: "kf": two or more node cannot have same suffix"#,
            err.to_string()
        );
    }

    #[tokio::test]
    async fn reserved_mount_paths_and_storage_type_are_checked() {
        let kf = kafka(Spec {
            version: "3.6.1".to_owned(),
            pod_template: PodTemplateSpec {
                spec: PodSpec {
                    volume_mounts: vec![VolumeMount {
                        name: "logs".to_owned(),
                        mount_path: "/var/log/kafka".to_owned(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        });

        let errors = kf.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors.iter().map(|e| e.detail.as_str()).collect();

        assert_eq!(
            vec![
                "Can't use a reserve volume mount path name: /var/log/kafka",
                "StorageType can not be empty",
            ],
            details
        );
    }

    fn resource_quantity(s: &str) -> k8s_openapi::apimachinery::pkg::api::resource::Quantity {
        k8s_openapi::apimachinery::pkg::api::resource::Quantity(s.to_owned())
    }
}
