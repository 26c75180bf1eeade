//! # Cassandra module
//!
//! This module provide the cassandra custom resource and its definition

use std::collections::BTreeSet;

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
        Kind, MonitorSpec, NamedServiceTemplateSpec, SecretReference, StorageType,
        TerminationPolicy,
    },
    k8s::field::{ErrorList, Path},
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "cassandra";
pub const INIT_CONTAINER_NAME: &str = "cassandra-init";

pub const NATIVE_TCP_PORT: i32 = 9042;
pub const INTER_NODE_PORT: i32 = 7000;
pub const INTER_NODE_SSL_PORT: i32 = 7001;
pub const JMX_PORT: i32 = 7199;
pub const EXPORTER_PORT: i32 = 8080;

pub const USER_ADMIN: &str = "admin";

pub const RESERVED_VOLUMES: [&str; 1] = ["data"];
pub const RESERVED_VOLUME_MOUNT_PATHS: [&str; 1] = ["/var/lib/cassandra"];

// -----------------------------------------------------------------------------
// Topology structures

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Rack {
    #[serde(rename = "name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "replicas", default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(rename = "podTemplate", default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
    #[serde(
        rename = "storageType",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub storage_type: Option<StorageType>,
    #[serde(rename = "storage", default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<PersistentVolumeClaimSpec>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Topology {
    #[serde(rename = "rack", default, skip_serializing_if = "Vec::is_empty")]
    pub rack: Vec<Rack>,
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "Cassandra")]
#[kube(plural = "cassandras")]
#[kube(shortname = "cas")]
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
    #[serde(
        rename = "deletionPolicy",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub deletion_policy: Option<TerminationPolicy>,
    #[serde(rename = "halted", default, skip_serializing_if = "std::ops::Not::not")]
    pub halted: bool,
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

fn set_template_defaults(pod: &mut PodTemplateSpec, info: &VersionInfo) {
    pod.set_security_context_defaults(CONTAINER_NAME, INIT_CONTAINER_NAME, info.run_as_user, false);
    pod.set_container_resources_defaults(CONTAINER_NAME, &template::default_resources());
}

// -----------------------------------------------------------------------------
// Cassandra implementation

impl Cassandra {
    pub fn rack_stateful_set_name(&self, rack: &str) -> String {
        format!("{}-rack-{}", self.offshoot_name(), rack)
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

    pub fn expected_stateful_sets(&self) -> usize {
        self.spec
            .topology
            .as_ref()
            .map(|topology| topology.rack.len())
            .unwrap_or(1)
    }

    /// names the racks without a name and fills their replicas and storage
    /// type
    fn set_topology_defaults(&mut self) {
        let prefix = self.offshoot_name();
        let topology = match &mut self.spec.topology {
            Some(topology) => topology,
            None => return,
        };

        let mut taken: BTreeSet<String> = BTreeSet::new();
        for rack in &mut topology.rack {
            rack.replicas.get_or_insert(1);
            rack.storage_type.get_or_insert(StorageType::Durable);

            if rack.name.is_empty() {
                let mut n = 1;
                while taken.contains(&format!("{}-{}", prefix, n)) {
                    n += 1;
                }

                rack.name = format!("{}-{}", prefix, n);
            }

            taken.insert(rack.name.to_owned());
        }
    }

    fn validate_rack(&self, errors: &mut ErrorList, path: Path, rack: &Rack) {
        let name = self.name_any();

        if rack.replicas.map(|r| r <= 0).unwrap_or(false) {
            errors.invalid(
                path.child("replicas"),
                &name,
                "number of replicas can't be 0 or less",
            );
        }

        match &rack.storage_type {
            Some(StorageType::Unknown(value)) => errors.invalid(
                path.child("storageType"),
                value,
                "StorageType should be either durable or ephemeral",
            ),
            storage_type => validate_storage_type(
                errors,
                path.child("storageType"),
                &name,
                storage_type.as_ref(),
            ),
        }

        if rack.storage.is_none() && rack.storage_type == Some(StorageType::Durable) {
            errors.invalid(
                path.child("storage"),
                &name,
                "Storage can't be empty when StorageType is durable",
            );
        }

        if let Some(pod) = &rack.pod_template {
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
impl Database for Cassandra {
    const KIND: Kind = Kind::Cassandra;

    fn termination_policy(&self) -> Option<TerminationPolicy> {
        self.spec.deletion_policy
    }

    fn default_auth_secret_name(&self) -> String {
        format!("{}-{}-cred", self.name_any(), USER_ADMIN)
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn set_defaults(&mut self, catalog: &dyn Catalog) {
        let name = self.name_any();

        self.spec.deletion_policy.get_or_insert(TerminationPolicy::Delete);
        if !self.spec.disable_security && self.spec.auth_secret.is_none() {
            self.spec.auth_secret = Some(SecretReference {
                name: self.default_auth_secret_name(),
                externally_managed: false,
                ..Default::default()
            });
        }

        if self.spec.topology.is_some() {
            self.set_topology_defaults();
        } else {
            self.spec.replicas.get_or_insert(1);
            self.spec.storage_type.get_or_insert(StorageType::Durable);
        }

        self.spec.health_checker.set_defaults(30, 10, 3);

        let info = match default_version(catalog, Self::KIND, &self.spec.version, &name).await {
            Some(info) => info,
            None => return,
        };

        match &mut self.spec.topology {
            Some(topology) => {
                for rack in &mut topology.rack {
                    set_template_defaults(rack.pod_template.get_or_insert_with(Default::default), &info);
                }
            }
            None => {
                set_template_defaults(
                    self.spec.pod_template.get_or_insert_with(Default::default),
                    &info,
                );
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

        if let Err(err) = lookup_version(catalog, Self::KIND, &self.spec.version, &name).await {
            errors.push(err);
            return errors;
        }

        match &self.spec.topology {
            Some(topology) => {
                let mut names = BTreeSet::new();
                let path = Path::new("spec").child("topology").child("rack");

                for (idx, rack) in topology.rack.iter().enumerate() {
                    if !names.insert(rack.name.as_str()) {
                        errors.invalid(
                            path.index(idx).child("name"),
                            &name,
                            "rack name is duplicated, use different rack name",
                        );
                    }

                    self.validate_rack(&mut errors, path.index(idx), rack);
                }

                if self.spec.pod_template.is_some() {
                    errors.invalid(
                        Path::new("spec").child("podTemplate"),
                        &name,
                        "PodTemplate should be nil in Topology",
                    );
                }

                if self.spec.replicas.is_some() {
                    errors.invalid(
                        Path::new("spec").child("replicas"),
                        &name,
                        "replica should be nil in Topology",
                    );
                }

                if self.spec.storage_type.is_some() {
                    errors.invalid(
                        Path::new("spec").child("storageType"),
                        &name,
                        "StorageType should be empty in Topology",
                    );
                }

                if self.spec.storage.is_some() {
                    errors.invalid(
                        Path::new("spec").child("storage"),
                        &name,
                        "storage should be nil in Topology",
                    );
                }
            }
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

                validate_storage_type(
                    &mut errors,
                    Path::new("spec").child("storageType"),
                    &name,
                    self.spec.storage_type.as_ref(),
                );

                if self.spec.storage.is_none() && self.spec.storage_type == Some(StorageType::Durable) {
                    errors.invalid(
                        Path::new("spec").child("storage"),
                        &name,
                        "Storage can't be empty when StorageType is durable",
                    );
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ObjectMeta;

    use super::*;
    use crate::svc::catalog::StaticCatalog;

    fn cassandra(spec: Spec) -> Cassandra {
        let mut cas = Cassandra::new("cas", spec);
        cas.metadata = ObjectMeta {
            name: Some("cas".to_owned()),
            namespace: Some("demo".to_owned()),
            ..Default::default()
        };
        cas
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::default().with(Kind::Cassandra, "5.0.0", Some(999))
    }

    fn rack(name: &str) -> Rack {
        Rack {
            name: name.to_owned(),
            storage: Some(PersistentVolumeClaimSpec::default()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn standalone_defaults_are_applied() {
        let mut cas = cassandra(Spec {
            version: "5.0.0".to_owned(),
            storage: Some(PersistentVolumeClaimSpec::default()),
            ..Default::default()
        });

        cas.set_defaults(&catalog()).await;

        assert_eq!(Some(TerminationPolicy::Delete), cas.spec.deletion_policy);
        assert_eq!(Some(1), cas.spec.replicas);
        assert_eq!(Some(StorageType::Durable), cas.spec.storage_type);
        assert_eq!("cas-admin-cred", cas.auth_secret_name());
        assert_eq!(Some(30), cas.spec.health_checker.period_seconds);

        let pod = cas.spec.pod_template.as_ref().expect("pod template to be set");
        let container = &pod.spec.containers[0];
        assert_eq!(CONTAINER_NAME, container.name);
        assert_eq!(Some(template::default_resources()), container.resources);
        assert_eq!(
            Some(999),
            container.security_context.as_ref().and_then(|ctx| ctx.run_as_user)
        );
        assert_eq!(INIT_CONTAINER_NAME, pod.spec.init_containers[0].name);

        assert_eq!(Ok(()), cas.validate_create(&catalog()).await);
    }

    #[tokio::test]
    async fn racks_are_named_and_defaulted() {
        let mut cas = cassandra(Spec {
            version: "5.0.0".to_owned(),
            disable_security: true,
            topology: Some(Topology {
                rack: vec![rack(""), rack("cas-1"), rack("")],
            }),
            ..Default::default()
        });

        cas.set_defaults(&catalog()).await;

        let racks = &cas.spec.topology.as_ref().expect("topology to be kept").rack;
        let names: Vec<_> = racks.iter().map(|rack| rack.name.as_str()).collect();
        assert_eq!(vec!["cas-1", "cas-1", "cas-2"], names);
        assert!(racks.iter().all(|rack| rack.replicas == Some(1)));
        assert!(racks.iter().all(|rack| rack.pod_template.is_some()));
        assert_eq!(None, cas.spec.replicas);
        assert_eq!(None, cas.spec.storage_type);
        assert_eq!(None, cas.spec.auth_secret);
        assert_eq!("cas-rack-cas-2", cas.rack_stateful_set_name(&racks[2].name));

        let err = cas
            .validate_create(&catalog())
            .await
            .expect_err("duplicated rack names to be refused");

        assert_eq!(1, err.errors.len());
        assert_eq!(
            "rack name is duplicated, use different rack name",
            err.errors.iter().map(|e| e.detail.as_str()).collect::<String>()
        );
    }

    #[tokio::test]
    async fn unknown_version_short_circuits() {
        let cas = cassandra(Spec {
            version: "1.0.0".to_owned(),
            replicas: Some(0),
            ..Default::default()
        });

        let errors = cas.validate_create_or_update(&catalog()).await;
        assert_eq!(1, errors.len());
        assert_eq!(
            "spec.version: Invalid value: \"1.0.0\": version 1.0.0 not supported",
            errors.to_string()
        );
    }

    #[tokio::test]
    async fn standalone_constraints_are_checked() {
        let cas = cassandra(Spec {
            version: "5.0.0".to_owned(),
            replicas: Some(3),
            storage_type: Some(StorageType::Durable),
            ..Default::default()
        });

        let errors = cas.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(
            vec![
                "number of replicas can't be greater than 1 in standalone mode",
                "Storage can't be empty when StorageType is durable",
            ],
            details
        );
    }

    #[tokio::test]
    async fn topology_excludes_flat_fields() {
        let cas = cassandra(Spec {
            version: "5.0.0".to_owned(),
            replicas: Some(1),
            storage_type: Some(StorageType::Durable),
            pod_template: Some(PodTemplateSpec::default()),
            topology: Some(Topology {
                rack: vec![Rack {
                    name: "r0".to_owned(),
                    replicas: Some(0),
                    storage_type: Some(StorageType::Unknown("Mixed".to_owned())),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        });

        let errors = cas.validate_create_or_update(&catalog()).await;
        let found: Vec<_> = errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.detail))
            .collect();

        assert_eq!(
            vec![
                "spec.topology.rack[0].replicas: number of replicas can't be 0 or less",
                "spec.topology.rack[0].storageType: StorageType should be either durable or ephemeral",
                "spec.podTemplate: PodTemplate should be nil in Topology",
                "spec.replicas: replica should be nil in Topology",
                "spec.storageType: StorageType should be empty in Topology",
            ],
            found
        );
    }
}
