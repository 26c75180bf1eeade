//! # Custom resource definition module
//!
//! This module provide custom resource definitions of the databases handled by
//! the webhook, their shared structures and the [`Database`] trait implemented
//! by each of them to be defaulted and validated.

use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::StatefulSet,
        core::v1::{SecurityContext, ServicePort, TypedLocalObjectReference},
    },
    apimachinery::pkg::apis::meta::v1::Condition,
};
use kube::{CustomResourceExt, Resource, ResourceExt};
use schemars::{gen::SchemaGenerator, schema::Schema, JsonSchema};
use serde::{
    de::{DeserializeOwned, IntoDeserializer},
    Deserialize, Deserializer, Serialize,
};

use tracing::{debug, error};

use crate::svc::{
    catalog::{Catalog, VersionInfo},
    crd::template::PodTemplateSpec,
    k8s::field::{ErrorList, FieldError, Invalid, Path},
};

pub mod cassandra;
pub mod clickhouse;
pub mod druid;
pub mod ferretdb;
pub mod kafka;
pub mod mssqlserver;
pub mod pgpool;
pub mod rabbitmq;
pub mod singlestore;
pub mod solr;
pub mod template;
pub mod version;
pub mod zookeeper;

// -----------------------------------------------------------------------------
// Constants

pub const GROUP: &str = "kubedb.com";
pub const VERSION: &str = "v1alpha2";

pub const NAME_LABEL_KEY: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL_KEY: &str = "app.kubernetes.io/instance";
pub const MANAGED_BY_LABEL_KEY: &str = "app.kubernetes.io/managed-by";
pub const COMPONENT_LABEL_KEY: &str = "app.kubernetes.io/component";
pub const COMPONENT_DATABASE: &str = "database";

// -----------------------------------------------------------------------------
// Kind enumeration

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum Kind {
    Cassandra,
    ClickHouse,
    Druid,
    FerretDb,
    Kafka,
    MsSqlServer,
    Pgpool,
    RabbitMq,
    Singlestore,
    Solr,
    ZooKeeper,
}

impl Kind {
    pub const ALL: [Self; 11] = [
        Self::Cassandra,
        Self::ClickHouse,
        Self::Druid,
        Self::FerretDb,
        Self::Kafka,
        Self::MsSqlServer,
        Self::Pgpool,
        Self::RabbitMq,
        Self::Singlestore,
        Self::Solr,
        Self::ZooKeeper,
    ];

    /// returns the kind as written in the `kind` field of objects
    pub const fn as_kind(&self) -> &'static str {
        match self {
            Self::Cassandra => "Cassandra",
            Self::ClickHouse => "ClickHouse",
            Self::Druid => "Druid",
            Self::FerretDb => "FerretDB",
            Self::Kafka => "Kafka",
            Self::MsSqlServer => "MSSQLServer",
            Self::Pgpool => "Pgpool",
            Self::RabbitMq => "RabbitMQ",
            Self::Singlestore => "Singlestore",
            Self::Solr => "Solr",
            Self::ZooKeeper => "ZooKeeper",
        }
    }

    pub const fn singular(&self) -> &'static str {
        match self {
            Self::Cassandra => "cassandra",
            Self::ClickHouse => "clickhouse",
            Self::Druid => "druid",
            Self::FerretDb => "ferretdb",
            Self::Kafka => "kafka",
            Self::MsSqlServer => "mssqlserver",
            Self::Pgpool => "pgpool",
            Self::RabbitMq => "rabbitmq",
            Self::Singlestore => "singlestore",
            Self::Solr => "solr",
            Self::ZooKeeper => "zookeeper",
        }
    }

    pub fn plural(&self) -> String {
        format!("{}s", self.singular())
    }

    /// returns the fully qualified resource name, e.g. `kafkas.kubedb.com`
    pub fn fqn(&self) -> String {
        format!("{}.{}", self.plural(), GROUP)
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.singular())
    }
}

impl FromStr for Kind {
    type Err = String;

    #[cfg_attr(feature = "trace", tracing::instrument)]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.singular() == s || kind.plural() == s)
            .ok_or_else(|| {
                format!(
                    "failed to parse '{}', available options are {}",
                    s,
                    Self::ALL
                        .iter()
                        .map(|kind| format!("'{}'", kind))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

// -----------------------------------------------------------------------------
// TerminationPolicy enumeration

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum TerminationPolicy {
    /// keeps the database volumes and secrets, removes everything else
    Halt,
    /// removes the database, keeps its volumes
    Delete,
    /// removes the database and everything it owns
    WipeOut,
    /// refuses the deletion of the database
    DoNotTerminate,
}

impl Display for TerminationPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halt => write!(f, "Halt"),
            Self::Delete => write!(f, "Delete"),
            Self::WipeOut => write!(f, "WipeOut"),
            Self::DoNotTerminate => write!(f, "DoNotTerminate"),
        }
    }
}

// -----------------------------------------------------------------------------
// StorageType enumeration

/// storage type of a database, values other than `Durable` or `Ephemeral` are
/// kept so validation is able to report them
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(from = "String", into = "String")]
pub enum StorageType {
    Durable,
    Ephemeral,
    Unknown(String),
}

impl From<String> for StorageType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Durable" => Self::Durable,
            "Ephemeral" => Self::Ephemeral,
            _ => Self::Unknown(s),
        }
    }
}

impl From<StorageType> for String {
    fn from(storage_type: StorageType) -> Self {
        storage_type.to_string()
    }
}

impl Display for StorageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable => write!(f, "Durable"),
            Self::Ephemeral => write!(f, "Ephemeral"),
            Self::Unknown(s) => write!(f, "{}", s),
        }
    }
}

impl JsonSchema for StorageType {
    fn schema_name() -> String {
        "StorageType".to_owned()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

// -----------------------------------------------------------------------------
// DatabasePhase enumeration

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum DatabasePhase {
    Provisioning,
    DataRestoring,
    Ready,
    Critical,
    NotReady,
    Halted,
    Unknown,
}

// -----------------------------------------------------------------------------
// DatabaseStatus structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct DatabaseStatus {
    #[serde(rename = "phase", default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DatabasePhase>,
    #[serde(
        rename = "observedGeneration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub observed_generation: Option<i64>,
    #[serde(rename = "conditions", default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// -----------------------------------------------------------------------------
// SecretReference structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct SecretReference {
    #[serde(rename = "kind", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        rename = "externallyManaged",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub externally_managed: bool,
}

// -----------------------------------------------------------------------------
// ObjectReference structure

/// reference to an object living in a namespace
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ObjectReference {
    #[serde(rename = "name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "namespace", default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

// -----------------------------------------------------------------------------
// Service templates

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum ServiceAlias {
    #[serde(rename = "primary")]
    Primary,
    #[serde(rename = "standby")]
    Standby,
    #[serde(rename = "stats")]
    Stats,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct MetaTemplate {
    #[serde(rename = "labels", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(
        rename = "annotations",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct ServiceSpecTemplate {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(rename = "ports", default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ServicePort>,
    #[serde(
        rename = "externalTrafficPolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_traffic_policy: Option<String>,
    #[serde(
        rename = "loadBalancerIP",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub load_balancer_ip: Option<String>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct ServiceTemplateSpec {
    #[serde(rename = "metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetaTemplate>,
    #[serde(rename = "spec", default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<ServiceSpecTemplate>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct NamedServiceTemplateSpec {
    #[serde(rename = "alias")]
    pub alias: ServiceAlias,
    #[serde(flatten)]
    pub template: ServiceTemplateSpec,
}

/// returns if a service template is declared for the given alias
pub fn has_service_template(templates: &[NamedServiceTemplateSpec], alias: ServiceAlias) -> bool {
    templates.iter().any(|template| template.alias == alias)
}

/// returns the service template declared for the given alias or an empty one
pub fn get_service_template(
    templates: &[NamedServiceTemplateSpec],
    alias: ServiceAlias,
) -> ServiceTemplateSpec {
    templates
        .iter()
        .find(|template| template.alias == alias)
        .map(|template| template.template.to_owned())
        .unwrap_or_default()
}

// -----------------------------------------------------------------------------
// HealthCheckSpec structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct HealthCheckSpec {
    #[serde(
        rename = "periodSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub period_seconds: Option<i32>,
    #[serde(
        rename = "timeoutSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_seconds: Option<i32>,
    #[serde(
        rename = "failureThreshold",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub failure_threshold: Option<i32>,
    #[serde(
        rename = "disableWriteCheck",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub disable_write_check: bool,
}

impl HealthCheckSpec {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// fills the unset health check settings
    pub fn set_defaults(&mut self, period: i32, timeout: i32, failure_threshold: i32) {
        self.period_seconds.get_or_insert(period);
        self.timeout_seconds.get_or_insert(timeout);
        self.failure_threshold.get_or_insert(failure_threshold);
    }
}

// -----------------------------------------------------------------------------
// TLS structures

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct CertificateSpec {
    #[serde(rename = "alias")]
    pub alias: String,
    #[serde(rename = "secretName", default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(rename = "dnsNames", default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    #[serde(rename = "duration", default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct TlsConfig {
    #[serde(rename = "issuerRef", default, skip_serializing_if = "Option::is_none")]
    pub issuer_ref: Option<TypedLocalObjectReference>,
    #[serde(rename = "certificates", default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<CertificateSpec>,
}

impl TlsConfig {
    /// sets the secret name of the certificate with the given alias if it is
    /// missing, the certificate is added if it is not declared
    pub fn set_missing_secret_name(&mut self, alias: &str, secret_name: String) {
        match self
            .certificates
            .iter_mut()
            .find(|certificate| certificate.alias == alias)
        {
            Some(certificate) => {
                if certificate.secret_name.as_deref().unwrap_or_default().is_empty() {
                    certificate.secret_name = Some(secret_name);
                }
            }
            None => self.certificates.push(CertificateSpec {
                alias: alias.to_owned(),
                secret_name: Some(secret_name),
                ..Default::default()
            }),
        }
    }

    /// returns the secret name of the certificate with the given alias
    pub fn secret_name(&self, alias: &str) -> Option<&str> {
        self.certificates
            .iter()
            .find(|certificate| certificate.alias == alias)
            .and_then(|certificate| certificate.secret_name.as_deref())
            .filter(|name| !name.is_empty())
    }
}

// -----------------------------------------------------------------------------
// Monitoring structures

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct ExporterSpec {
    #[serde(rename = "port", default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(rename = "args", default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(
        rename = "securityContext",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub security_context: Option<SecurityContext>,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct PrometheusSpec {
    #[serde(rename = "exporter", default)]
    pub exporter: ExporterSpec,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct MonitorSpec {
    #[serde(rename = "agent", default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(rename = "prometheus", default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusSpec>,
}

impl MonitorSpec {
    /// fills the exporter port and runs the exporter as the database user
    pub fn set_defaults(&mut self, port: i32, run_as_user: Option<i64>) {
        let exporter = &mut self.prometheus.get_or_insert_with(Default::default).exporter;
        if exporter.port.unwrap_or_default() == 0 {
            exporter.port = Some(port);
        }

        let security_context = exporter.security_context.get_or_insert_with(Default::default);
        if security_context.run_as_user.is_none() {
            security_context.run_as_user = run_as_user;
        }

        if security_context.run_as_group.is_none() {
            security_context.run_as_group = run_as_user;
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers

/// deserializes an optional enumeration, an empty string is read as an absent
/// value so that it gets defaulted
pub fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) if !s.is_empty() => {
            T::deserialize(IntoDeserializer::<'de, D::Error>::into_deserializer(s)).map(Some)
        }
        _ => Ok(None),
    }
}

/// returns the major number of a version, e.g. `28` for `28.0.1`
pub fn major_version(version: &str) -> Option<u64> {
    version
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
}

/// validates the storage type, it has to be set and be either `Durable` or
/// `Ephemeral`
pub fn validate_storage_type(
    errors: &mut ErrorList,
    path: Path,
    value: &str,
    storage_type: Option<&StorageType>,
) {
    match storage_type {
        None => errors.invalid(path, value, "StorageType can not be empty"),
        Some(StorageType::Unknown(_)) => errors.invalid(
            path,
            value,
            "StorageType should be either durable or ephemeral",
        ),
        Some(_) => {}
    }
}

/// returns the version object referenced by the database, the field error
/// explains why it could not be used
pub async fn lookup_version(
    catalog: &dyn Catalog,
    kind: Kind,
    version: &str,
    name: &str,
) -> Result<VersionInfo, FieldError> {
    let path = Path::new("spec").child("version");
    if version.is_empty() {
        return Err(FieldError::invalid(path, name, "spec.version' is missing"));
    }

    let info = catalog.version(kind, version).await.map_err(|err| {
        debug!(kind = kind.as_kind(), version = version, error = err.to_string(), "Could not find version");
        FieldError::invalid(path.to_owned(), version, format!("version {} not supported", version))
    })?;

    if info.deprecated {
        return Err(FieldError::invalid(
            path,
            version,
            format!(
                "{} {} is using deprecated version {}. Skipped processing",
                kind.as_kind(),
                name,
                version
            ),
        ));
    }

    Ok(info)
}

/// returns the version object referenced by the database, a failure is logged
/// and the caller skips the defaults depending on it
pub async fn default_version(
    catalog: &dyn Catalog,
    kind: Kind,
    version: &str,
    name: &str,
) -> Option<VersionInfo> {
    match catalog.version(kind, version).await {
        Ok(info) => Some(info),
        Err(err) => {
            error!(
                kind = kind.as_kind(),
                name = name,
                version = version,
                error = err.to_string(),
                "Could not retrieve version object, skip defaults depending on it"
            );
            None
        }
    }
}

/// switches the policy to `Halt` on halted databases, returns false if the
/// database could not be halted as its deletion is forbidden
pub fn set_halt_policy(
    policy: &mut Option<TerminationPolicy>,
    halted: bool,
    kind: Kind,
    name: &str,
) -> bool {
    if !halted {
        return true;
    }

    if *policy == Some(TerminationPolicy::DoNotTerminate) {
        error!(
            kind = kind.as_kind(),
            name = name,
            "Could not halt database, since termination policy is 'DoNotTerminate'"
        );
        return false;
    }

    *policy = Some(TerminationPolicy::Halt);
    true
}

/// validates the volumes and the volume mounts of the pod template located at
/// the given path against the reserved ones
pub fn validate_pod_template<S>(
    errors: &mut ErrorList,
    kind: Kind,
    path: &Path,
    name: &str,
    template: &PodTemplateSpec,
    volumes: &[S],
    mount_paths: &[&str],
) where
    S: AsRef<str>,
{
    if let Err(err) = template.validate_volumes(volumes) {
        errors.invalid(path.child("spec").child("volumes"), name, err.reported_for(kind));
    }

    if let Err(err) = template.validate_volume_mount_paths(mount_paths) {
        errors.invalid(path.child("spec").child("volumeMounts"), name, err);
    }
}

/// returns if the expected count of stateful sets exists and if they are all
/// ready, the message explains why they are not
pub fn check_replicas(stateful_sets: &[StatefulSet], expected: usize) -> (bool, String) {
    if stateful_sets.len() < expected {
        return (
            false,
            format!(
                "All StatefulSets are not available. Desire number of StatefulSet: {}, Available: {}",
                expected,
                stateful_sets.len()
            ),
        );
    }

    for stateful_set in stateful_sets {
        let desired = stateful_set
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1);
        let ready = stateful_set
            .status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or_default();

        if desired != ready {
            return (
                false,
                format!(
                    "StatefulSet {}/{} is not ready",
                    stateful_set.namespace().unwrap_or_default(),
                    stateful_set.name_any()
                ),
            );
        }
    }

    (true, String::new())
}

// -----------------------------------------------------------------------------
// Database trait

/// behaviour shared by the database custom resources, the mutating webhook
/// calls [`Database::set_defaults`] and the validating one the validation
/// methods.
#[async_trait]
pub trait Database:
    Resource<DynamicType = ()>
    + CustomResourceExt
    + Serialize
    + DeserializeOwned
    + Clone
    + Debug
    + Send
    + Sync
    + 'static
{
    const KIND: Kind;

    /// returns the policy applied when the database is deleted
    fn termination_policy(&self) -> Option<TerminationPolicy>;

    /// returns the path of the termination policy field
    fn termination_policy_path() -> Path {
        Path::new("spec").child("deletionPolicy")
    }

    /// fills absent fields with their default values, values that depend on the
    /// referenced catalog version are skipped if it could not be retrieved
    async fn set_defaults(&mut self, catalog: &dyn Catalog);

    /// accumulates the errors of the object
    async fn validate_create_or_update(&self, catalog: &dyn Catalog) -> ErrorList;

    async fn validate_create(&self, catalog: &dyn Catalog) -> Result<(), Invalid> {
        self.invalid(self.validate_create_or_update(catalog).await)
    }

    async fn validate_update(&self, _old: &Self, catalog: &dyn Catalog) -> Result<(), Invalid> {
        self.invalid(self.validate_create_or_update(catalog).await)
    }

    #[cfg_attr(feature = "trace", tracing::instrument)]
    fn validate_delete(&self) -> Result<(), Invalid> {
        let mut errors = ErrorList::default();
        if self.termination_policy() == Some(TerminationPolicy::DoNotTerminate) {
            errors.invalid(
                Self::termination_policy_path(),
                self.name_any(),
                "Can not delete as terminationPolicy is set to \"DoNotTerminate\"",
            );
        }

        self.invalid(errors)
    }

    /// wraps the field errors into an [`Invalid`] error naming this object
    fn invalid(&self, errors: ErrorList) -> Result<(), Invalid> {
        errors.into_result(GROUP, Self::KIND.as_kind(), &self.name_any())
    }

    fn offshoot_name(&self) -> String {
        self.name_any()
    }

    fn service_name(&self) -> String {
        self.offshoot_name()
    }

    fn governing_service_name(&self) -> String {
        format!("{}-pods", self.service_name())
    }

    fn default_auth_secret_name(&self) -> String {
        format!("{}-auth", self.offshoot_name())
    }

    fn certificate_name(&self, alias: &str) -> String {
        format!("{}-{}-cert", self.name_any(), alias)
    }

    fn cert_secret_volume_name(&self, alias: &str) -> String {
        format!("{}-certs", alias)
    }

    fn offshoot_selectors(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (NAME_LABEL_KEY.to_owned(), Self::KIND.fqn()),
            (INSTANCE_LABEL_KEY.to_owned(), self.name_any()),
            (MANAGED_BY_LABEL_KEY.to_owned(), GROUP.to_owned()),
        ])
    }

    /// returns the labels of the owned resources, labels of the object are
    /// propagated except the ones in the kubedb domain
    fn offshoot_labels(&self) -> BTreeMap<String, String> {
        let mut labels: BTreeMap<_, _> = self
            .labels()
            .iter()
            .filter(|(key, _)| !key.contains(GROUP))
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();

        labels.extend(self.offshoot_selectors());
        labels.insert(
            COMPONENT_LABEL_KEY.to_owned(),
            COMPONENT_DATABASE.to_owned(),
        );
        labels
    }
}
