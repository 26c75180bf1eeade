//! # FerretDB module
//!
//! This module provide the ferretdb custom resource and its definition. A
//! ferretdb server speaks the mongodb protocol and stores its documents in a
//! postgres backend, either provisioned alongside or externally managed.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::svc::{
    catalog::Catalog,
    crd::{
        default_version, lookup_version, major_version,
        template::{self, PodTemplateSpec},
        Database, DatabaseStatus, HealthCheckSpec, Kind, MonitorSpec, NamedServiceTemplateSpec,
        ObjectReference, SecretReference, StorageType, TerminationPolicy, TlsConfig,
    },
    k8s::field::{ErrorList, Path},
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "ferretdb";

pub const DEFAULT_PORT: i32 = 27017;
pub const TLS_PORT: i32 = 27018;
pub const METRICS_PORT: i32 = 56790;

pub const SERVER_CERT: &str = "server";
pub const CLIENT_CERT: &str = "client";

pub const LINKED_DB_EXTERNAL: &str = "postgres";
pub const LINKED_DB_INTERNAL: &str = "ferretdb";

pub const BACKEND_VERSION: &str = "16.7-doc";
pub const LEGACY_BACKEND_VERSION: &str = "16.4-bookworm";

/// environment variables managed by the operator
pub const FORBIDDEN_ENVS: [&str; 8] = [
    "FERRETDB_PG_USER",
    "FERRETDB_PG_PASSWORD",
    "FERRETDB_HANDLER",
    "FERRETDB_POSTGRESQL_URL",
    "FERRETDB_LISTEN_TLS",
    "FERRETDB_LISTEN_TLS_CA_FILE",
    "FERRETDB_LISTEN_TLS_CERT_FILE",
    "FERRETDB_LISTEN_TLS_KEY_FILE",
];

// -----------------------------------------------------------------------------
// SslMode enumeration

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum SslMode {
    #[serde(rename = "disabled")]
    Disabled,
    #[serde(rename = "allowSSL")]
    AllowSsl,
    #[serde(rename = "preferSSL")]
    PreferSsl,
    #[serde(rename = "requireSSL")]
    RequireSsl,
}

// -----------------------------------------------------------------------------
// Backend structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Backend {
    #[serde(
        rename = "postgresRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub postgres_ref: Option<ObjectReference>,
    #[serde(rename = "version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "linkedDB", default, skip_serializing_if = "String::is_empty")]
    pub linked_db: String,
    #[serde(
        rename = "externallyManaged",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub externally_managed: bool,
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "FerretDB")]
#[kube(plural = "ferretdbs")]
#[kube(shortname = "fr")]
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
    #[serde(rename = "authSecret", default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<SecretReference>,
    #[serde(
        rename = "sslMode",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub ssl_mode: Option<SslMode>,
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
    #[serde(rename = "tls", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(rename = "halted", default, skip_serializing_if = "std::ops::Not::not")]
    pub halted: bool,
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
    #[serde(rename = "backend", default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
}

// -----------------------------------------------------------------------------
// FerretDB implementation

impl FerretDB {
    pub fn is_backend_externally_managed(&self) -> bool {
        self.spec
            .backend
            .as_ref()
            .map(|backend| backend.externally_managed)
            .unwrap_or(false)
    }

    pub fn port(&self) -> i32 {
        match self.spec.ssl_mode {
            Some(SslMode::RequireSsl) => TLS_PORT,
            _ => DEFAULT_PORT,
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn set_backend_defaults(&mut self) {
        let namespace = self.namespace().unwrap_or_default();
        let backend = self.spec.backend.get_or_insert_with(Default::default);

        if backend.linked_db.is_empty() {
            backend.linked_db = match backend.externally_managed {
                true => LINKED_DB_EXTERNAL.to_owned(),
                false => LINKED_DB_INTERNAL.to_owned(),
            };
        }

        if let Some(postgres) = backend
            .postgres_ref
            .as_mut()
            .filter(|postgres| !postgres.name.is_empty())
        {
            if postgres.namespace.is_empty() {
                postgres.namespace = namespace;
            }
        }
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

    fn validate_storage(&self, errors: &mut ErrorList) {
        let name = self.name_any();
        let path = Path::new("spec").child("storageType");

        match &self.spec.storage_type {
            None => errors.invalid(path, &name, "'spec.storageType' is missing"),
            Some(StorageType::Unknown(value)) => {
                errors.invalid(path, &name, format!("'spec.storageType' {} is invalid", value))
            }
            Some(StorageType::Ephemeral) if self.spec.storage.is_some() => errors.invalid(
                path,
                &name,
                "'spec.storageType' is set to Ephemeral, so 'spec.storage' needs to be empty",
            ),
            Some(StorageType::Durable)
                if self.spec.storage.is_none() && !self.is_backend_externally_managed() =>
            {
                errors.invalid(
                    Path::new("spec").child("storage"),
                    &name,
                    "'spec.storage' is missing for durable storage type when postgres is internally managed",
                )
            }
            Some(_) => {}
        }
    }

    fn validate_backend(&self, errors: &mut ErrorList) {
        let name = self.name_any();
        let path = Path::new("spec").child("backend");
        let backend = match &self.spec.backend {
            Some(backend) if backend.externally_managed => backend,
            _ => return,
        };

        match &backend.postgres_ref {
            None => errors.invalid(
                path.child("postgresRef"),
                &name,
                "'backend.postgresRef' is missing when backend is externally managed",
            ),
            Some(postgres) if postgres.namespace.is_empty() => errors.invalid(
                path.child("postgresRef").child("namespace"),
                &name,
                "'backend.postgresRef.namespace' is needed when backend is externally managed",
            ),
            Some(_) => {}
        }
    }

    fn validate_ssl_mode(&self, errors: &mut ErrorList) {
        let name = self.name_any();
        let path = Path::new("spec").child("sslMode");

        match self.spec.ssl_mode {
            Some(SslMode::AllowSsl | SslMode::PreferSsl) => errors.invalid(
                path,
                &name,
                "'spec.sslMode' value 'allowSSL' or 'preferSSL' is not supported yet for FerretDB",
            ),
            Some(SslMode::RequireSsl) if self.spec.tls.is_none() => errors.invalid(
                path,
                &name,
                "'spec.sslMode' is requireSSL but 'spec.tls' is not set",
            ),
            Some(SslMode::Disabled) if self.spec.tls.is_some() => errors.invalid(
                Path::new("spec").child("tls"),
                &name,
                "'spec.tls' is can't set when 'spec.sslMode' is disabled",
            ),
            _ => {}
        }
    }
}

#[async_trait]
impl Database for FerretDB {
    const KIND: Kind = Kind::FerretDb;

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
        self.spec.termination_policy.get_or_insert(TerminationPolicy::WipeOut);
        self.spec.ssl_mode.get_or_insert(SslMode::Disabled);
        self.spec.replicas.get_or_insert(1);
        self.spec.auth_secret.get_or_insert_with(Default::default);

        self.set_backend_defaults();
        self.set_tls_defaults();
        self.spec.health_checker.set_defaults(10, 10, 2);

        let info = match default_version(catalog, Self::KIND, &self.spec.version, &name).await {
            Some(info) => info,
            None => return,
        };

        let pod = &mut self.spec.pod_template;
        let ctx = pod.spec.security_context.get_or_insert_with(Default::default);
        if ctx.fs_group.is_none() {
            ctx.fs_group = info.run_as_user;
        }

        let container = pod.container_mut(CONTAINER_NAME);
        template::restrict(
            container.security_context.get_or_insert_with(Default::default),
            info.run_as_user,
            true,
        );
        pod.set_container_resources_defaults(CONTAINER_NAME, &template::default_resources());

        if let Some(monitor) = &mut self.spec.monitor {
            monitor.set_defaults(METRICS_PORT, info.run_as_user);
        }

        if let Some(backend) = self
            .spec
            .backend
            .as_mut()
            .filter(|backend| !backend.externally_managed)
        {
            let version = match major_version(&info.version) {
                Some(major) if major >= 2 => BACKEND_VERSION,
                _ => LEGACY_BACKEND_VERSION,
            };

            backend.version.get_or_insert_with(|| version.to_owned());
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn validate_create_or_update(&self, catalog: &dyn Catalog) -> ErrorList {
        let name = self.name_any();
        let mut errors = ErrorList::default();

        if let Err(err) = lookup_version(catalog, Self::KIND, &self.spec.version, &name).await {
            errors.push(err);
        }

        match self.spec.replicas {
            Some(replicas) if replicas >= 1 => {}
            replicas => errors.invalid(
                Path::new("spec").child("replicas"),
                &name,
                format!(
                    "spec.replicas \"{}\" invalid. Must be greater than zero",
                    replicas.map(|r| r.to_string()).unwrap_or_default()
                ),
            ),
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
                format!("environment variable {} is forbidden to use in FerretDB spec", env),
            );
        }

        self.validate_storage(&mut errors);

        let unnamed_secret = self
            .spec
            .auth_secret
            .as_ref()
            .map(|secret| secret.externally_managed && secret.name.is_empty())
            .unwrap_or(false);

        if unnamed_secret {
            errors.invalid(
                Path::new("spec").child("authSecret").child("name"),
                &name,
                "'spec.authSecret.name' need to specify when auth secret is externally managed",
            );
        }

        if self.spec.termination_policy == Some(TerminationPolicy::Halt) {
            errors.invalid(
                Self::termination_policy_path(),
                &name,
                "'spec.terminationPolicy' value 'Halt' is not supported yet for FerretDB",
            );
        }

        self.validate_backend(&mut errors);
        self.validate_ssl_mode(&mut errors);

        errors
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Container, EnvVar, TypedLocalObjectReference};
    use kube::core::ObjectMeta;

    use super::*;
    use crate::svc::{catalog::StaticCatalog, crd::template::PodSpec};

    fn ferretdb(spec: Spec) -> FerretDB {
        let mut fr = FerretDB::new("fr", spec);
        fr.metadata = ObjectMeta {
            name: Some("fr".to_owned()),
            namespace: Some("demo".to_owned()),
            ..Default::default()
        };
        fr
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::default()
            .with(Kind::FerretDb, "2.0.0", Some(1000))
            .with(Kind::FerretDb, "1.23.0", Some(1000))
    }

    fn tls() -> TlsConfig {
        TlsConfig {
            issuer_ref: Some(TypedLocalObjectReference {
                api_group: Some("cert-manager.io".to_owned()),
                kind: "Issuer".to_owned(),
                name: "fr-ca".to_owned(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn defaults_are_applied() {
        let mut fr = ferretdb(Spec {
            version: "2.0.0".to_owned(),
            storage: Some(PersistentVolumeClaimSpec::default()),
            monitor: Some(MonitorSpec::default()),
            ..Default::default()
        });

        fr.set_defaults(&catalog()).await;

        assert_eq!(Some(StorageType::Durable), fr.spec.storage_type);
        assert_eq!(Some(TerminationPolicy::WipeOut), fr.spec.termination_policy);
        assert_eq!(Some(SslMode::Disabled), fr.spec.ssl_mode);
        assert_eq!(Some(1), fr.spec.replicas);
        assert_eq!(Some(SecretReference::default()), fr.spec.auth_secret);
        assert_eq!(Some(2), fr.spec.health_checker.failure_threshold);
        assert_eq!(DEFAULT_PORT, fr.port());

        let backend = fr.spec.backend.as_ref().expect("backend to be added");
        assert_eq!(LINKED_DB_INTERNAL, backend.linked_db);
        assert_eq!(Some(BACKEND_VERSION.to_owned()), backend.version);

        let template = &fr.spec.pod_template;
        assert_eq!(
            Some(1000),
            template.spec.security_context.as_ref().and_then(|ctx| ctx.fs_group)
        );
        assert_eq!(CONTAINER_NAME, template.spec.containers[0].name);
        assert!(template.spec.init_containers.is_empty());
        assert_eq!(
            Some(1000),
            template.spec.containers[0]
                .security_context
                .as_ref()
                .and_then(|ctx| ctx.run_as_group)
        );
        assert_eq!(
            Some(template::default_resources()),
            template.spec.containers[0].resources
        );

        let exporter = fr
            .spec
            .monitor
            .as_ref()
            .and_then(|m| m.prometheus.as_ref())
            .expect("prometheus exporter to be defaulted");
        assert_eq!(Some(METRICS_PORT), exporter.exporter.port);

        assert_eq!(Ok(()), fr.validate_create(&catalog()).await);
    }

    #[tokio::test]
    async fn backend_follows_the_major_version() {
        let mut fr = ferretdb(Spec {
            version: "1.23.0".to_owned(),
            ..Default::default()
        });

        fr.set_defaults(&catalog()).await;
        assert_eq!(
            Some(LEGACY_BACKEND_VERSION.to_owned()),
            fr.spec.backend.and_then(|backend| backend.version)
        );

        let mut fr = ferretdb(Spec {
            version: "2.0.0".to_owned(),
            backend: Some(Backend {
                externally_managed: true,
                postgres_ref: Some(ObjectReference {
                    name: "pg".to_owned(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            tls: Some(tls()),
            ..Default::default()
        });

        fr.set_defaults(&catalog()).await;

        let backend = fr.spec.backend.as_ref().expect("backend to be kept");
        assert_eq!(LINKED_DB_EXTERNAL, backend.linked_db);
        assert_eq!(None, backend.version);
        assert_eq!(
            Some("demo"),
            backend.postgres_ref.as_ref().map(|pg| pg.namespace.as_str())
        );

        let tls = fr.spec.tls.as_ref().expect("tls to be kept");
        assert_eq!(Some("fr-server-cert"), tls.secret_name(SERVER_CERT));
        assert_eq!(Some("fr-client-cert"), tls.secret_name(CLIENT_CERT));
    }

    #[tokio::test]
    async fn invalid_settings_are_reported() {
        let fr = ferretdb(Spec {
            version: "2.0.0".to_owned(),
            replicas: Some(0),
            storage_type: Some(StorageType::Durable),
            auth_secret: Some(SecretReference {
                externally_managed: true,
                ..Default::default()
            }),
            termination_policy: Some(TerminationPolicy::Halt),
            backend: Some(Backend {
                externally_managed: true,
                postgres_ref: Some(ObjectReference {
                    name: "pg".to_owned(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ssl_mode: Some(SslMode::RequireSsl),
            pod_template: PodTemplateSpec {
                spec: PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_owned(),
                        env: Some(vec![EnvVar {
                            name: "FERRETDB_HANDLER".to_owned(),
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

        let errors = fr.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.detail))
            .collect();

        assert_eq!(
            vec![
                r#"spec.replicas: spec.replicas "0" invalid. Must be greater than zero"#,
                "spec.podTemplate.spec.containers.env: environment variable FERRETDB_HANDLER is forbidden to use in FerretDB spec",
                "spec.authSecret.name: 'spec.authSecret.name' need to specify when auth secret is externally managed",
                "spec.terminationPolicy: 'spec.terminationPolicy' value 'Halt' is not supported yet for FerretDB",
                "spec.backend.postgresRef.namespace: 'backend.postgresRef.namespace' is needed when backend is externally managed",
                "spec.sslMode: 'spec.sslMode' is requireSSL but 'spec.tls' is not set",
            ],
            details
        );
    }

    #[tokio::test]
    async fn storage_and_tls_are_checked() {
        let fr = ferretdb(Spec {
            version: "2.0.0".to_owned(),
            replicas: Some(1),
            storage_type: Some(StorageType::Ephemeral),
            storage: Some(PersistentVolumeClaimSpec::default()),
            ssl_mode: Some(SslMode::Disabled),
            tls: Some(tls()),
            ..Default::default()
        });

        let errors = fr.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(
            vec![
                "'spec.storageType' is set to Ephemeral, so 'spec.storage' needs to be empty",
                "'spec.tls' is can't set when 'spec.sslMode' is disabled",
            ],
            details
        );

        let fr = ferretdb(Spec {
            version: "2.0.0".to_owned(),
            replicas: Some(1),
            storage_type: Some(StorageType::Durable),
            ssl_mode: Some(SslMode::PreferSsl),
            backend: Some(Backend {
                externally_managed: true,
                ..Default::default()
            }),
            ..Default::default()
        });

        let errors = fr.validate_create_or_update(&catalog()).await;
        let details: Vec<_> = errors.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(
            vec![
                "'backend.postgresRef' is missing when backend is externally managed",
                "'spec.sslMode' value 'allowSSL' or 'preferSSL' is not supported yet for FerretDB",
            ],
            details
        );
    }

    #[test]
    fn deletion_reports_the_termination_policy() {
        let fr = ferretdb(Spec {
            termination_policy: Some(TerminationPolicy::DoNotTerminate),
            ..Default::default()
        });

        let err = fr.validate_delete().expect_err("deletion to be refused");
        assert_eq!(
            r#"FerretDB.kubedb.com "fr" is invalid: spec.terminationPolicy: Invalid value: "fr": Can not delete as terminationPolicy is set to "DoNotTerminate""#,
            err.to_string()
        );
    }

    #[test]
    fn empty_ssl_mode_is_defaulted() {
        let spec: Spec = serde_json::from_value(serde_json::json!({
            "version": "2.0.0",
            "sslMode": "",
            "storageType": "",
        }))
        .expect("spec to be parsed");

        assert_eq!(None, spec.ssl_mode);
        assert_eq!(None, spec.storage_type);
    }
}
