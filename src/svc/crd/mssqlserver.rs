//! # MSSQLServer module
//!
//! This module provide the mssql server custom resource and its definition. A
//! server is either standalone or part of an availability group, in which case
//! a coordinator container runs next to the database and drives the leader
//! election. TLS is mandatory.

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
        validate_storage_type, Database, DatabaseStatus, HealthCheckSpec, Kind, MonitorSpec,
        NamedServiceTemplateSpec, SecretReference, StorageType, TerminationPolicy, TlsConfig,
    },
    k8s::{
        field::{ErrorList, Path},
        resource::requirements,
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const CONTAINER_NAME: &str = "mssql";
pub const COORDINATOR_CONTAINER_NAME: &str = "mssql-coordinator";
pub const INIT_CONTAINER_NAME: &str = "mssql-init";

pub const PORT: i32 = 1433;

pub const SERVER_CERT: &str = "server";
pub const CLIENT_CERT: &str = "client";
pub const ENDPOINT_CERT: &str = "endpoint";

pub const CAPABILITY_NET_BIND_SERVICE: &str = "NET_BIND_SERVICE";

pub const ENV_PID: &str = "MSSQL_PID";

/// environment variables managed by the operator
pub const FORBIDDEN_ENVS: [&str; 5] = [
    "MSSQL_SA_USERNAME",
    "MSSQL_SA_PASSWORD",
    "MSSQL_ENABLE_HADR",
    "MSSQL_AGENT_ENABLED",
    "VERSION",
];

pub const RESERVED_VOLUMES: [&str; 8] = [
    "data",
    "config",
    "init-scripts",
    "endpoint-cert",
    "certs",
    "tls",
    "security-ca-certificates",
    "cacerts",
];
pub const RESERVED_VOLUME_MOUNT_PATHS: [&str; 8] = [
    "/var/opt/mssql",
    "/var/opt/mssql/mssql.conf",
    "/scripts",
    "/var/opt/mssql/endpoint-cert",
    "/var/opt/mssql/certs",
    "/var/opt/mssql/tls",
    "/var/opt/mssql/security/ca-certificates",
    "/etc/ssl/certs",
];

// -----------------------------------------------------------------------------
// Topology structures

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Mode {
    AvailabilityGroup,
    RemoteReplica,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum SecondaryAccessMode {
    #[default]
    Passive,
    ReadOnly,
    All,
}

/// raft settings of the coordinators, durations are written as `300ms` or `1s`
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct LeaderElection {
    #[serde(rename = "period", default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(
        rename = "electionTick",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub election_tick: Option<i32>,
    #[serde(
        rename = "heartbeatTick",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub heartbeat_tick: Option<i32>,
    #[serde(
        rename = "transferLeadershipInterval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transfer_leadership_interval: Option<String>,
    #[serde(
        rename = "transferLeadershipTimeout",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transfer_leadership_timeout: Option<String>,
}

impl LeaderElection {
    pub fn set_defaults(&mut self) {
        self.period.get_or_insert_with(|| "300ms".to_owned());
        self.election_tick.get_or_insert(10);
        self.heartbeat_tick.get_or_insert(1);
        self.transfer_leadership_interval
            .get_or_insert_with(|| "1s".to_owned());
        self.transfer_leadership_timeout
            .get_or_insert_with(|| "60s".to_owned());
    }
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct AvailabilityGroup {
    #[serde(rename = "databases", default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<String>,
    #[serde(
        rename = "leaderElection",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub leader_election: Option<LeaderElection>,
    #[serde(rename = "secondaryAccessMode", default)]
    pub secondary_access_mode: SecondaryAccessMode,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Topology {
    #[serde(
        rename = "mode",
        default,
        deserialize_with = "super::empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub mode: Option<Mode>,
    #[serde(
        rename = "availabilityGroup",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub availability_group: Option<AvailabilityGroup>,
}

// -----------------------------------------------------------------------------
// MssqlTlsConfig structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct MssqlTlsConfig {
    #[serde(flatten)]
    pub tls: TlsConfig,
    #[serde(rename = "clientTLS", default, skip_serializing_if = "Option::is_none")]
    pub client_tls: Option<bool>,
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
#[kube(group = "kubedb.com")]
#[kube(version = "v1alpha2")]
#[kube(kind = "MSSQLServer")]
#[kube(plural = "mssqlservers")]
#[kube(shortname = "ms")]
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
    #[serde(rename = "tls", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<MssqlTlsConfig>,
    #[serde(
        rename = "serviceTemplates",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub service_templates: Vec<NamedServiceTemplateSpec>,
    #[serde(rename = "halted", default, skip_serializing_if = "std::ops::Not::not")]
    pub halted: bool,
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
// MSSQLServer implementation

impl MSSQLServer {
    pub fn is_standalone(&self) -> bool {
        self.spec.topology.is_none()
    }

    pub fn is_availability_group(&self) -> bool {
        self.spec
            .topology
            .as_ref()
            .map(|topology| topology.mode == Some(Mode::AvailabilityGroup))
            .unwrap_or(false)
    }

    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn set_tls_defaults(&mut self) {
        let server = self.certificate_name(SERVER_CERT);
        let client = self.certificate_name(CLIENT_CERT);
        if let Some(tls) = self
            .spec
            .tls
            .as_mut()
            .map(|tls| &mut tls.tls)
            .filter(|tls| tls.issuer_ref.is_some())
        {
            tls.set_missing_secret_name(SERVER_CERT, server);
            tls.set_missing_secret_name(CLIENT_CERT, client);
        }
    }

    fn set_pod_template_defaults(&mut self, info: &VersionInfo) {
        let coordinated = self.is_availability_group();
        let pod = &mut self.spec.pod_template;

        let ctx = pod.spec.security_context.get_or_insert_with(Default::default);
        if ctx.fs_group.is_none() {
            ctx.fs_group = info.run_as_user;
        }

        let ctx = pod
            .container_mut(CONTAINER_NAME)
            .security_context
            .get_or_insert_with(Default::default);
        let bind_privileged_port = ctx.capabilities.is_none();
        template::restrict(ctx, info.run_as_user, true);
        if let Some(capabilities) = ctx.capabilities.as_mut().filter(|_| bind_privileged_port) {
            capabilities.add = Some(vec![CAPABILITY_NET_BIND_SERVICE.to_owned()]);
        }

        template::restrict(
            pod.init_container_mut(INIT_CONTAINER_NAME)
                .security_context
                .get_or_insert_with(Default::default),
            info.run_as_user,
            true,
        );

        if coordinated {
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

        pod.set_container_resources_defaults(CONTAINER_NAME, &requirements(".500", "1.5Gi", "1.5Gi"));
        pod.set_init_container_resources_defaults(
            INIT_CONTAINER_NAME,
            &template::default_init_container_resources(),
        );
    }

    fn validate_replicas(&self, errors: &mut ErrorList) {
        let name = self.name_any();
        let path = Path::new("spec").child("replicas");

        match &self.spec.topology {
            None => {
                if self.spec.replicas != Some(1) {
                    errors.invalid(path, &name, "number of replicas for standalone must be one ");
                }
            }
            Some(topology) => {
                if topology.mode.is_none() {
                    errors.invalid(
                        Path::new("spec").child("topology").child("mode"),
                        &name,
                        ".spec.topology.mode can't be empty in cluster mode",
                    );
                }

                if self.spec.replicas.map(|r| r <= 0).unwrap_or(true) {
                    errors.invalid(
                        path,
                        &name,
                        "number of replicas can not be nil and can not be less than or equal to 0",
                    );
                }
            }
        }
    }

    fn validate_env(&self, errors: &mut ErrorList) {
        let name = self.name_any();
        let path = Path::new("spec").child("podTemplate");
        let template = &self.spec.pod_template;

        if template.is_empty() {
            return;
        }

        if let Some(env) = template.forbidden_env(CONTAINER_NAME, &FORBIDDEN_ENVS) {
            errors.invalid(
                path.to_owned(),
                &name,
                format!(
                    "environment variable {} is forbidden to use in MSSQLServer spec",
                    env
                ),
            );
        }

        if !template
            .container_env(CONTAINER_NAME)
            .iter()
            .any(|env| env.name == ENV_PID)
        {
            errors.invalid(
                path,
                &name,
                format!(
                    "environment variable {} must be provided in MSSQLServer spec",
                    ENV_PID
                ),
            );
        }
    }
}

#[async_trait]
impl Database for MSSQLServer {
    const KIND: Kind = Kind::MsSqlServer;

    fn termination_policy(&self) -> Option<TerminationPolicy> {
        self.spec.deletion_policy
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn set_defaults(&mut self, catalog: &dyn Catalog) {
        let name = self.name_any();

        self.spec.storage_type.get_or_insert(StorageType::Durable);
        self.spec.deletion_policy.get_or_insert(TerminationPolicy::Delete);

        match &mut self.spec.topology {
            None => {
                self.spec.replicas.get_or_insert(1);
            }
            Some(topology) => {
                if let Some(group) = &mut topology.availability_group {
                    group
                        .leader_election
                        .get_or_insert_with(Default::default)
                        .set_defaults();
                }
            }
        }

        let info = match default_version(catalog, Self::KIND, &self.spec.version, &name).await {
            Some(info) => info,
            None => return,
        };

        self.set_pod_template_defaults(&info);
        self.set_tls_defaults();
        self.spec.health_checker.set_defaults(10, 10, 1);
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
    async fn validate_create_or_update(&self, catalog: &dyn Catalog) -> ErrorList {
        let name = self.name_any();
        let mut errors = ErrorList::default();

        if let Err(err) = lookup_version(catalog, Self::KIND, &self.spec.version, &name).await {
            errors.push(err);
        }

        self.validate_replicas(&mut errors);

        match &self.spec.tls {
            None => errors.invalid(Path::new("spec").child("tls"), &name, "spec.tls is missing"),
            Some(tls) if tls.tls.issuer_ref.is_none() => errors.invalid(
                Path::new("spec").child("tls").child("issuerRef"),
                &name,
                "spec.tls.issuerRef' is missing",
            ),
            Some(_) => {}
        }

        self.validate_env(&mut errors);

        let path = Path::new("spec").child("podTemplate").child("spec");
        if let Err(err) = self.spec.pod_template.validate_volumes(&RESERVED_VOLUMES) {
            errors.invalid(path.child("volumes"), &name, err.reported_for(Self::KIND));
        }

        if let Err(err) = self
            .spec
            .pod_template
            .validate_volume_mount_paths(&RESERVED_VOLUME_MOUNT_PATHS)
        {
            errors.invalid(path.child("containers"), &name, err);
        }

        validate_storage_type(
            &mut errors,
            Path::new("spec").child("storageType"),
            &name,
            self.spec.storage_type.as_ref(),
        );

        errors
    }
}
