//! # ZooKeeper module
//!
//! This module provide the zookeeper custom resource and its definition

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
        validate_pod_template, Database, DatabaseStatus, HealthCheckSpec, Kind, MonitorSpec,
        NamedServiceTemplateSpec, SecretReference, TerminationPolicy, TlsConfig,
    },
    k8s::field::{ErrorList, Path},
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "zookeeper";
pub const INIT_CONTAINER_NAME: &str = "zookeeper-init";

pub const CLIENT_PORT: i32 = 2181;
pub const QUORUM_PORT: i32 = 2888;
pub const LEADER_ELECTION_PORT: i32 = 3888;
pub const ADMIN_SERVER_PORT: i32 = 8080;
pub const METRICS_PORT: i32 = 7000;

pub const SERVER_CERT: &str = "server";
pub const CLIENT_CERT: &str = "client";

pub const RESERVED_VOLUMES: [&str; 3] = ["data", "script-vol", "zookeeper-config"];
pub const RESERVED_VOLUME_MOUNT_PATHS: [&str; 3] = ["/scripts", "/conf", "/data"];

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "ZooKeeper")]
#[kube(plural = "zookeepers")]
#[kube(shortname = "zk")]
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
        rename = "adminServerPort",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub admin_server_port: Option<i32>,
    #[serde(rename = "storage", default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<PersistentVolumeClaimSpec>,
    #[serde(
        rename = "disableAuth",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub disable_auth: bool,
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
    #[serde(rename = "tls", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(
        rename = "keystoreCredSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub keystore_cred_secret: Option<SecretReference>,
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
// ZooKeeper implementation

impl ZooKeeper {
    pub fn admin_server_port(&self) -> i32 {
        self.spec.admin_server_port.unwrap_or(ADMIN_SERVER_PORT)
    }

    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn set_tls_defaults(&mut self) {
        let name = self.name_any();
        if let Some(tls) = self.spec.tls.as_mut().filter(|tls| tls.issuer_ref.is_some()) {
            tls.set_missing_secret_name(SERVER_CERT, format!("{}-{}-cert", name, SERVER_CERT));
            tls.set_missing_secret_name(CLIENT_CERT, format!("{}-{}-cert", name, CLIENT_CERT));
        }
    }
}

#[async_trait]
impl Database for ZooKeeper {
    const KIND: Kind = Kind::ZooKeeper;

    fn termination_policy(&self) -> Option<TerminationPolicy> {
        self.spec.deletion_policy
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn set_defaults(&mut self, catalog: &dyn Catalog) {
        let name = self.name_any();

        self.spec.deletion_policy.get_or_insert(TerminationPolicy::Delete);
        self.spec.replicas.get_or_insert(1);

        if !set_halt_policy(&mut self.spec.deletion_policy, self.spec.halted, Self::KIND, &name) {
            return;
        }

        if !self.spec.disable_auth {
            let secret = self.spec.auth_secret.get_or_insert_with(Default::default);
            secret.kind.get_or_insert_with(|| "Secret".to_owned());
        }

        if self.spec.enable_ssl {
            self.set_tls_defaults();
        }

        self.spec.health_checker.set_defaults(10, 10, 1);

        let info = default_version(catalog, Self::KIND, &self.spec.version, &name).await;
        let run_as_user = info.as_ref().and_then(|info| info.run_as_user);

        if let Some(monitor) = &mut self.spec.monitor {
            monitor.set_defaults(METRICS_PORT, run_as_user);
        }

        if info.is_none() {
            return;
        }

        let pod = &mut self.spec.pod_template;
        pod.set_security_context_defaults(CONTAINER_NAME, INIT_CONTAINER_NAME, run_as_user, true);
        pod.set_container_resources_defaults(CONTAINER_NAME, &template::default_resources());
        pod.set_init_container_resources_defaults(
            INIT_CONTAINER_NAME,
            &template::default_init_container_resources(),
        );
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn validate_create_or_update(&self, catalog: &dyn Catalog) -> ErrorList {
        let name = self.name_any();
        let mut errors = ErrorList::default();

        if self.spec.replicas == Some(2) {
            errors.invalid(
                Path::new("spec").child("replicas"),
                &name,
                "zookeeper ensemble should have 3 or more replicas",
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
            &RESERVED_VOLUMES,
            &RESERVED_VOLUME_MOUNT_PATHS,
        );

        errors
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{
        Container, TypedLocalObjectReference, Volume, VolumeMount,
    };
    use kube::core::ObjectMeta;

    use super::*;
    use crate::svc::{catalog::StaticCatalog, crd::template::PodSpec};

    fn zookeeper(spec: Spec) -> ZooKeeper {
        let mut zk = ZooKeeper::new("zk", spec);
        zk.metadata = ObjectMeta {
            name: Some("zk".to_owned()),
            namespace: Some("demo".to_owned()),
            ..Default::default()
        };
        zk
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::default().with(Kind::ZooKeeper, "3.8.3", Some(1000))
    }

    #[tokio::test]
    async fn defaults_are_applied() {
        let mut zk = zookeeper(Spec {
            version: "3.8.3".to_owned(),
            monitor: Some(MonitorSpec::default()),
            ..Default::default()
        });

        zk.set_defaults(&catalog()).await;

        assert_eq!(Some(TerminationPolicy::Delete), zk.spec.deletion_policy);
        assert_eq!(Some(1), zk.spec.replicas);
        assert_eq!(
            Some("Secret".to_owned()),
            zk.spec.auth_secret.as_ref().and_then(|s| s.kind.to_owned())
        );
        assert_eq!(Some(10), zk.spec.health_checker.period_seconds);
        assert_eq!(Some(1), zk.spec.health_checker.failure_threshold);

        let template = &zk.spec.pod_template;
        assert_eq!(CONTAINER_NAME, template.spec.containers[0].name);
        assert_eq!(INIT_CONTAINER_NAME, template.spec.init_containers[0].name);
        assert_eq!(
            Some(template::default_resources()),
            template.spec.containers[0].resources
        );
        assert_eq!(
            Some(template::default_init_container_resources()),
            template.spec.init_containers[0].resources
        );

        let exporter = zk
            .spec
            .monitor
            .and_then(|m| m.prometheus)
            .expect("prometheus exporter to be defaulted")
            .exporter;
        assert_eq!(Some(METRICS_PORT), exporter.port);
        assert_eq!(
            Some(1000),
            exporter.security_context.and_then(|ctx| ctx.run_as_group)
        );
    }

    #[tokio::test]
    async fn halted_database_with_do_not_terminate_is_left_alone() {
        let mut zk = zookeeper(Spec {
            version: "3.8.3".to_owned(),
            halted: true,
            deletion_policy: Some(TerminationPolicy::DoNotTerminate),
            ..Default::default()
        });

        zk.set_defaults(&catalog()).await;
        assert_eq!(Some(TerminationPolicy::DoNotTerminate), zk.spec.deletion_policy);
        assert!(zk.spec.health_checker.is_empty());

        let mut zk = zookeeper(Spec {
            version: "3.8.3".to_owned(),
            halted: true,
            ..Default::default()
        });

        zk.set_defaults(&catalog()).await;
        assert_eq!(Some(TerminationPolicy::Halt), zk.spec.deletion_policy);
    }

    #[tokio::test]
    async fn unknown_version_only_skips_dependent_defaults() {
        let mut zk = zookeeper(Spec {
            version: "0.0.0".to_owned(),
            enable_ssl: true,
            tls: Some(TlsConfig {
                issuer_ref: Some(TypedLocalObjectReference {
                    api_group: Some("cert-manager.io".to_owned()),
                    kind: "Issuer".to_owned(),
                    name: "zk-ca".to_owned(),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        zk.set_defaults(&catalog()).await;

        assert!(zk.spec.pod_template.is_empty());
        assert_eq!(Some(10), zk.spec.health_checker.timeout_seconds);
        let tls = zk.spec.tls.expect("tls to be kept");
        assert_eq!(Some("zk-server-cert"), tls.secret_name(SERVER_CERT));
        assert_eq!(Some("zk-client-cert"), tls.secret_name(CLIENT_CERT));
    }

    #[tokio::test]
    async fn ensemble_of_two_is_refused() {
        let zk = zookeeper(Spec {
            version: "3.8.3".to_owned(),
            replicas: Some(2),
            ..Default::default()
        });

        let err = zk
            .validate_create(&catalog())
            .await
            .expect_err("an ensemble of two replicas to be refused");

        assert_eq!(
            r#"ZooKeeper.kubedb.com "zk" is invalid: spec.replicas: Invalid value: "zk": zookeeper ensemble should have 3 or more replicas"#,
            err.to_string()
        );

        let zk = zookeeper(Spec {
            version: "3.8.3".to_owned(),
            replicas: Some(3),
            ..Default::default()
        });

        assert_eq!(Ok(()), zk.validate_create(&catalog()).await);
    }

    #[tokio::test]
    async fn errors_are_accumulated() {
        let zk = zookeeper(Spec {
            version: "3.4.0".to_owned(),
            pod_template: PodTemplateSpec {
                spec: PodSpec {
                    volumes: vec![Volume {
                        name: "script-vol".to_owned(),
                        ..Default::default()
                    }],
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_owned(),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "conf".to_owned(),
                            mount_path: "/conf".to_owned(),
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

        let errors = zk.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors.iter().map(|err| err.detail.as_str()).collect();

        assert_eq!(
            vec![
                "version 3.4.0 not supported",
                "Cannot use a reserve volume name: script-vol",
                "Can't use a reserve volume mount path name: /conf",
            ],
            details
        );
    }

    #[test]
    fn deletion_is_refused_with_do_not_terminate() {
        let zk = zookeeper(Spec {
            deletion_policy: Some(TerminationPolicy::DoNotTerminate),
            ..Default::default()
        });

        let err = zk.validate_delete().expect_err("deletion to be refused");
        assert_eq!(
            r#"ZooKeeper.kubedb.com "zk" is invalid: spec.deletionPolicy: Invalid value: "zk": Can not delete as terminationPolicy is set to "DoNotTerminate""#,
            err.to_string()
        );

        let zk = zookeeper(Spec {
            deletion_policy: Some(TerminationPolicy::WipeOut),
            ..Default::default()
        });
        assert_eq!(Ok(()), zk.validate_delete());
        assert_eq!(8080, zk.admin_server_port());
    }
}
