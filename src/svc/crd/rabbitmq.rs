//! # RabbitMQ module
//!
//! This module provide the rabbitmq custom resource and its definition

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LocalObjectReference, PersistentVolumeClaimSpec};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::{
    catalog::Catalog,
    crd::{
        default_version, lookup_version, set_halt_policy,
        template::{self, PodTemplateSpec},
        validate_pod_template, validate_storage_type, Database, DatabaseStatus, HealthCheckSpec,
        Kind, MonitorSpec, NamedServiceTemplateSpec, SecretReference, StorageType,
        TerminationPolicy, TlsConfig,
    },
    k8s::field::{ErrorList, Path},
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "rabbitmq";
pub const INIT_CONTAINER_NAME: &str = "rabbitmq-init";

pub const AMQP_PORT: i32 = 5672;
pub const AMQPS_PORT: i32 = 5671;
pub const MANAGEMENT_UI_PORT: i32 = 15672;
pub const EXPORTER_PORT: i32 = 15692;

pub const SERVER_CERT: &str = "server";
pub const CLIENT_CERT: &str = "client";

pub const RESERVED_VOLUMES: [&str; 3] = ["data", "rabbitmqconfig", "temp-config"];
pub const RESERVED_VOLUME_MOUNT_PATHS: [&str; 5] = [
    "/config/",
    "/tmp/config/",
    "/var/lib/rabbitmq/mnesia",
    "/etc/rabbitmq/",
    "/var/private/ssl",
];

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "RabbitMQ")]
#[kube(plural = "rabbitmqs")]
#[kube(shortname = "rm")]
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
        rename = "configSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub config_secret: Option<LocalObjectReference>,
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
    #[serde(rename = "halted", default, skip_serializing_if = "std::ops::Not::not")]
    pub halted: bool,
    #[serde(rename = "monitor", default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSpec>,
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
}

// -----------------------------------------------------------------------------
// RabbitMQ implementation

impl RabbitMQ {
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
}

#[async_trait]
impl Database for RabbitMQ {
    const KIND: Kind = Kind::RabbitMq;

    fn termination_policy(&self) -> Option<TerminationPolicy> {
        self.spec.termination_policy
    }

    fn termination_policy_path() -> Path {
        Path::new("spec").child("terminationPolicy")
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn set_defaults(&mut self, catalog: &dyn Catalog) {
        let name = self.name_any();

        self.spec.replicas.get_or_insert(1);
        self.spec.termination_policy.get_or_insert(TerminationPolicy::Delete);
        self.spec.storage_type.get_or_insert(StorageType::Durable);

        if !set_halt_policy(&mut self.spec.termination_policy, self.spec.halted, Self::KIND, &name) {
            return;
        }

        if self.spec.enable_ssl {
            let server = self.certificate_name(SERVER_CERT);
            let client = self.certificate_name(CLIENT_CERT);
            if let Some(tls) = self.spec.tls.as_mut().filter(|tls| tls.issuer_ref.is_some()) {
                tls.set_missing_secret_name(SERVER_CERT, server);
                tls.set_missing_secret_name(CLIENT_CERT, client);
            }
        }

        self.spec.health_checker.set_defaults(10, 10, 3);

        let info = match default_version(catalog, Self::KIND, &self.spec.version, &name).await {
            Some(info) => info,
            None => return,
        };

        if let Some(monitor) = &mut self.spec.monitor {
            monitor.set_defaults(EXPORTER_PORT, info.run_as_user);
        }

        let pod = &mut self.spec.pod_template;
        pod.set_security_context_defaults(CONTAINER_NAME, INIT_CONTAINER_NAME, info.run_as_user, false);
        pod.set_container_resources_defaults(CONTAINER_NAME, &template::default_resources());
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

        if self.spec.replicas.map(|r| r <= 0).unwrap_or(false) {
            errors.invalid(
                Path::new("spec").child("replicas"),
                &name,
                "number of replicas can not be 0 or less",
            );
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

        if let Some(secret) = &self.spec.config_secret {
            if secret.name.as_deref().unwrap_or_default().is_empty() {
                errors.invalid(
                    Path::new("spec").child("configSecret").child("name"),
                    &name,
                    "ConfigSecret Name can not be empty",
                );
            }
        }

        errors
    }
}
