//! # Pgpool module
//!
//! This module provide the pgpool custom resource and its definition. A pgpool
//! deployment pools and balances the connections to a postgres database it
//! references.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::LocalObjectReference;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::{
    catalog::Catalog,
    crd::{
        default_version, lookup_version,
        template::{self, PodTemplateSpec},
        validate_pod_template, Database, DatabaseStatus, HealthCheckSpec, Kind, MonitorSpec,
        NamedServiceTemplateSpec, ObjectReference, SecretReference, TerminationPolicy, TlsConfig,
    },
    k8s::field::{ErrorList, Path},
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "pgpool";

pub const PORT: i32 = 9999;
pub const PCP_PORT: i32 = 9595;
pub const MONITORING_PORT: i32 = 9719;

pub const SERVER_CERT: &str = "server";
pub const CLIENT_CERT: &str = "client";
pub const METRICS_EXPORTER_CERT: &str = "metrics-exporter";

pub const MAX_REPLICAS: i32 = 9;

pub const RESERVED_VOLUMES: [&str; 2] = ["pgpool-config", "certs"];
pub const RESERVED_VOLUME_MOUNT_PATHS: [&str; 2] = ["/config", "/config/tls"];

/// environment variables managed by the operator
pub const FORBIDDEN_ENVS: [&str; 7] = [
    "POSTGRES_USERNAME",
    "POSTGRES_PASSWORD",
    "PGPOOL_PCP_USER",
    "PGPOOL_PCP_PASSWORD",
    "PGPOOL_PASSWORD_ENCRYPTION_METHOD",
    "PGPOOL_ENABLE_POOL_PASSWD",
    "PGPOOL_SKIP_PASSWORD_ENCRYPTION",
];

// -----------------------------------------------------------------------------
// Connection enumerations

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuthMode {
    Md5,
    Scram,
    Cert,
}

// -----------------------------------------------------------------------------
// InitConfiguration structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct InitConfiguration {
    /// pgpool.conf settings, written as is in the generated configuration
    #[serde(
        rename = "pgpoolConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pgpool_config: Option<serde_json::Value>,
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "Pgpool")]
#[kube(plural = "pgpools")]
#[kube(shortname = "pp")]
#[kube(status = "DatabaseStatus")]
#[kube(namespaced)]
#[kube(derive = "PartialEq")]
#[kube(printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".apiVersion"}"#)]
#[kube(printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#)]
pub struct Spec {
    #[serde(rename = "syncUsers", default, skip_serializing_if = "std::ops::Not::not")]
    pub sync_users: bool,
    #[serde(rename = "version", default)]
    pub version: String,
    #[serde(rename = "replicas", default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(
        rename = "postgresRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub postgres_ref: Option<ObjectReference>,
    #[serde(rename = "authSecret", default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<SecretReference>,
    #[serde(
        rename = "configSecret",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub config_secret: Option<LocalObjectReference>,
    #[serde(
        rename = "podTemplate",
        default,
        skip_serializing_if = "PodTemplateSpec::is_empty"
    )]
    pub pod_template: PodTemplateSpec,
    #[serde(rename = "initConfig", default, skip_serializing_if = "Option::is_none")]
    pub init_config: Option<InitConfiguration>,
    #[serde(
        rename = "serviceTemplates",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub service_templates: Vec<NamedServiceTemplateSpec>,
    #[serde(rename = "tls", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(
        rename = "sslMode",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub ssl_mode: Option<SslMode>,
    #[serde(
        rename = "clientAuthMode",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_auth_mode: Option<ClientAuthMode>,
    #[serde(
        rename = "healthChecker",
        default,
        skip_serializing_if = "HealthCheckSpec::is_empty"
    )]
    pub health_checker: HealthCheckSpec,
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
        rename = "podPlacementPolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pod_placement_policy: Option<LocalObjectReference>,
}

// -----------------------------------------------------------------------------
// Pgpool implementation

impl Pgpool {
    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn set_tls_defaults(&mut self) {
        let certificates = [SERVER_CERT, CLIENT_CERT, METRICS_EXPORTER_CERT]
            .map(|alias| (alias, self.certificate_name(alias)));

        if let Some(tls) = self.spec.tls.as_mut().filter(|tls| tls.issuer_ref.is_some()) {
            for (alias, secret_name) in certificates {
                tls.set_missing_secret_name(alias, secret_name);
            }
        }
    }

    fn validate_health_checker(&self, errors: &mut ErrorList) {
        let path = Path::new("spec").child("healthChecker");
        let checker = &self.spec.health_checker;
        let settings = [
            ("periodSeconds", checker.period_seconds),
            ("timeoutSeconds", checker.timeout_seconds),
            ("failureThreshold", checker.failure_threshold),
        ];

        for (field, value) in settings {
            if let Some(value) = value.filter(|value| *value <= 0) {
                errors.invalid(
                    path.to_owned(),
                    value,
                    format!("spec.healthCheck.{}: can not be less than 1", field),
                );
            }
        }
    }
}

#[async_trait]
impl Database for Pgpool {
    const KIND: Kind = Kind::Pgpool;

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
        if self.spec.ssl_mode.is_none() {
            self.spec.ssl_mode = Some(match self.spec.tls {
                Some(_) => SslMode::VerifyFull,
                None => SslMode::Disable,
            });
        }

        let info = match default_version(catalog, Self::KIND, &self.spec.version, &name).await {
            Some(info) => info,
            None => return,
        };

        if let Some(monitor) = &mut self.spec.monitor {
            monitor.set_defaults(MONITORING_PORT, info.run_as_user);
        }

        self.set_tls_defaults();
        self.spec.health_checker.set_defaults(10, 10, 1);

        let pod = &mut self.spec.pod_template;
        let ctx = pod.spec.security_context.get_or_insert_with(Default::default);
        if ctx.fs_group.is_none() {
            ctx.fs_group = info.run_as_user;
        }

        template::restrict(
            pod.container_mut(CONTAINER_NAME)
                .security_context
                .get_or_insert_with(Default::default),
            info.run_as_user,
            true,
        );
        pod.set_container_resources_defaults(CONTAINER_NAME, &template::default_resources());
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn validate_create_or_update(&self, catalog: &dyn Catalog) -> ErrorList {
        let name = self.name_any();
        let mut errors = ErrorList::default();

        if self.spec.version.is_empty() {
            errors.required(Path::new("spec").child("version"), "`spec.version` is missing");
        } else if let Err(err) =
            lookup_version(catalog, Self::KIND, &self.spec.version, &name).await
        {
            errors.push(err);
        }

        if self.spec.postgres_ref.is_none() {
            errors.required(
                Path::new("spec").child("postgresRef"),
                "`spec.postgresRef` is missing",
            );
        }

        let has_init_config = self
            .spec
            .init_config
            .as_ref()
            .map(|config| config.pgpool_config.is_some())
            .unwrap_or(false);

        if self.spec.config_secret.is_some() && has_init_config {
            for field in ["configSecret", "initConfig"] {
                errors.invalid(
                    Path::new("spec").child(field),
                    &name,
                    "use either `spec.configSecret` or `spec.initConfig`",
                );
            }
        }

        if self.spec.tls.is_none() {
            if self.spec.ssl_mode.map(|mode| mode != SslMode::Disable).unwrap_or(false) {
                errors.invalid(
                    Path::new("spec").child("sslMode"),
                    &name,
                    "Tls is not enabled, enable it to use this sslMode",
                );
            }

            if self.spec.client_auth_mode == Some(ClientAuthMode::Cert) {
                errors.invalid(
                    Path::new("spec").child("clientAuthMode"),
                    &name,
                    "Tls is not enabled, enable it to use this clientAuthMode",
                );
            }
        }

        match self.spec.replicas {
            Some(replicas) if replicas <= 0 => errors.required(
                Path::new("spec").child("replicas"),
                "`spec.replica` must be greater than 0",
            ),
            Some(replicas) if replicas > MAX_REPLICAS => errors.required(
                Path::new("spec").child("replicas"),
                "`spec.replica` must be less than 10",
            ),
            _ => {}
        }

        if let Some(env) = self
            .spec
            .pod_template
            .forbidden_env(CONTAINER_NAME, &FORBIDDEN_ENVS)
        {
            errors.invalid(
                Path::new("spec")
                    .child("podTemplate")
                    .child("spec")
                    .child("containers")
                    .child("env"),
                &name,
                format!("environment variable {} is forbidden to use in Pgpool spec", env),
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

        self.validate_health_checker(&mut errors);

        errors
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Container, EnvVar, TypedLocalObjectReference, Volume};
    use kube::core::ObjectMeta;

    use super::*;
    use crate::svc::{catalog::StaticCatalog, crd::template::PodSpec};

    fn pgpool(spec: Spec) -> Pgpool {
        let mut pp = Pgpool::new("pp", spec);
        pp.metadata = ObjectMeta {
            name: Some("pp".to_owned()),
            namespace: Some("demo".to_owned()),
            ..Default::default()
        };
        pp
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::default().with(Kind::Pgpool, "4.5.0", Some(70))
    }

    fn postgres_ref() -> Option<ObjectReference> {
        Some(ObjectReference {
            name: "ha-postgres".to_owned(),
            namespace: "demo".to_owned(),
        })
    }

    #[tokio::test]
    async fn defaults_are_applied() {
        let mut pp = pgpool(Spec {
            version: "4.5.0".to_owned(),
            postgres_ref: postgres_ref(),
            monitor: Some(MonitorSpec::default()),
            tls: Some(TlsConfig {
                issuer_ref: Some(TypedLocalObjectReference {
                    api_group: Some("cert-manager.io".to_owned()),
                    kind: "Issuer".to_owned(),
                    name: "pp-ca".to_owned(),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        pp.set_defaults(&catalog()).await;

        assert_eq!(Some(1), pp.spec.replicas);
        assert_eq!(Some(TerminationPolicy::Delete), pp.spec.termination_policy);
        assert_eq!(Some(SslMode::VerifyFull), pp.spec.ssl_mode);
        assert_eq!(Some(1), pp.spec.health_checker.failure_threshold);

        let tls = pp.spec.tls.as_ref().expect("tls to be kept");
        assert_eq!(Some("pp-server-cert"), tls.secret_name(SERVER_CERT));
        assert_eq!(Some("pp-client-cert"), tls.secret_name(CLIENT_CERT));
        assert_eq!(
            Some("pp-metrics-exporter-cert"),
            tls.secret_name(METRICS_EXPORTER_CERT)
        );

        let template = &pp.spec.pod_template;
        assert_eq!(CONTAINER_NAME, template.spec.containers[0].name);
        assert!(template.spec.init_containers.is_empty());
        assert_eq!(
            Some(70),
            template.spec.containers[0]
                .security_context
                .as_ref()
                .and_then(|ctx| ctx.run_as_group)
        );

        let exporter = pp
            .spec
            .monitor
            .as_ref()
            .and_then(|m| m.prometheus.as_ref())
            .expect("prometheus exporter to be defaulted");
        assert_eq!(Some(MONITORING_PORT), exporter.exporter.port);

        assert_eq!(Ok(()), pp.validate_create(&catalog()).await);
    }

    #[tokio::test]
    async fn ssl_mode_is_disabled_without_tls() {
        let mut pp = pgpool(Spec {
            version: "0.0.0".to_owned(),
            ..Default::default()
        });

        pp.set_defaults(&catalog()).await;

        assert_eq!(Some(SslMode::Disable), pp.spec.ssl_mode);
        assert!(pp.spec.pod_template.is_empty());
        assert!(pp.spec.health_checker.is_empty());
    }

    #[tokio::test]
    async fn missing_fields_are_required() {
        let pp = pgpool(Spec {
            replicas: Some(10),
            ..Default::default()
        });

        let err = pp
            .validate_create(&catalog())
            .await
            .expect_err("missing fields to be refused");

        assert_eq!(
            "Pgpool.kubedb.com \"pp\" is invalid: [spec.version: Required value: `spec.version` is missing, spec.postgresRef: Required value: `spec.postgresRef` is missing, spec.replicas: Required value: `spec.replica` must be less than 10]",
            err.to_string()
        );
    }

    #[tokio::test]
    async fn errors_are_accumulated() {
        let pp = pgpool(Spec {
            version: "4.5.0".to_owned(),
            replicas: Some(0),
            postgres_ref: postgres_ref(),
            config_secret: Some(LocalObjectReference {
                name: Some("pp-config".to_owned()),
            }),
            init_config: Some(InitConfiguration {
                pgpool_config: Some(serde_json::json!({ "num_init_children": 6 })),
            }),
            ssl_mode: Some(SslMode::Require),
            client_auth_mode: Some(ClientAuthMode::Cert),
            pod_template: PodTemplateSpec {
                spec: PodSpec {
                    volumes: vec![Volume {
                        name: "certs".to_owned(),
                        ..Default::default()
                    }],
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_owned(),
                        env: Some(vec![EnvVar {
                            name: "PGPOOL_PCP_USER".to_owned(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                ..Default::default()
            },
            health_checker: HealthCheckSpec {
                period_seconds: Some(0),
                ..Default::default()
            },
            ..Default::default()
        });

        let errors = pp.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.detail))
            .collect();

        assert_eq!(
            vec![
                "spec.configSecret: use either `spec.configSecret` or `spec.initConfig`",
                "spec.initConfig: use either `spec.configSecret` or `spec.initConfig`",
                "spec.sslMode: Tls is not enabled, enable it to use this sslMode",
                "spec.clientAuthMode: Tls is not enabled, enable it to use this clientAuthMode",
                "spec.replicas: `spec.replica` must be greater than 0",
                "spec.podTemplate.spec.containers.env: environment variable PGPOOL_PCP_USER is forbidden to use in Pgpool spec",
                "spec.podTemplate.spec.volumes: Cannot use a reserve volume name: certs",
                "spec.healthChecker: spec.healthCheck.periodSeconds: can not be less than 1",
            ],
            details
        );
    }

    #[test]
    fn modes_are_read_from_their_wire_names() {
        let spec: Spec = serde_json::from_value(serde_json::json!({
            "version": "4.5.0",
            "sslMode": "verify-ca",
            "clientAuthMode": "scram",
            "terminationPolicy": "",
        }))
        .expect("spec to be parsed");

        assert_eq!(Some(SslMode::VerifyCa), spec.ssl_mode);
        assert_eq!(Some(ClientAuthMode::Scram), spec.client_auth_mode);
        assert_eq!(None, spec.termination_policy);
    }
}
