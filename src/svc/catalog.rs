//! # Catalog module
//!
//! This module provide the lookup of the version objects referenced by the
//! databases, either from the kubernetes api server or from memory.

use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use kube::{Api, Client};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::svc::crd::{
    version::{
        CassandraVersion, CatalogVersion, ClickHouseVersion, DruidVersion, FerretDBVersion,
        KafkaVersion, MSSQLServerVersion, PgpoolVersion, RabbitMQVersion, SinglestoreVersion,
        SolrVersion, ZooKeeperVersion,
    },
    Kind,
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to find version '{1}' of kind '{0}'")]
    NotFound(Kind, String),
    #[error("failed to retrieve version '{1}' of kind '{0}', {2}")]
    Get(Kind, String, kube::Error),
    #[error("failed to parse version manifest, {0}")]
    Parse(serde_yaml::Error),
    #[error("failed to parse version manifest, unknown kind '{0}'")]
    UnknownKind(String),
}

// -----------------------------------------------------------------------------
// VersionInfo structure

/// the part of a version object used to default and validate databases
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct VersionInfo {
    pub name: String,
    pub version: String,
    pub deprecated: bool,
    pub run_as_user: Option<i64>,
}

impl VersionInfo {
    pub fn from_version<T>(obj: &T) -> Self
    where
        T: CatalogVersion,
    {
        let details = obj.details();

        Self {
            name: obj.version_name(),
            version: details.version.to_owned(),
            deprecated: details.deprecated,
            run_as_user: details.security_context.run_as_user,
        }
    }
}

// -----------------------------------------------------------------------------
// Catalog trait

#[async_trait]
pub trait Catalog: Send + Sync {
    /// returns the version object with the given name for the kind
    async fn version(&self, kind: Kind, name: &str) -> Result<VersionInfo, Error>;
}

// -----------------------------------------------------------------------------
// KubeCatalog structure

/// catalog reading cluster scoped version objects from the api server
#[derive(Clone)]
pub struct KubeCatalog {
    client: Client,
}

impl From<Client> for KubeCatalog {
    fn from(client: Client) -> Self {
        Self { client }
    }
}

impl KubeCatalog {
    async fn get<T>(&self, name: &str) -> Result<VersionInfo, Error>
    where
        T: CatalogVersion,
    {
        let api: Api<T> = Api::all(self.client.to_owned());

        trace!(kind = T::DATABASE.as_kind(), name = name, "Retrieve version object");
        match api.get_opt(name).await {
            Ok(Some(obj)) => Ok(VersionInfo::from_version(&obj)),
            Ok(None) => Err(Error::NotFound(T::DATABASE, name.to_owned())),
            Err(err) => Err(Error::Get(T::DATABASE, name.to_owned(), err)),
        }
    }
}

#[async_trait]
impl Catalog for KubeCatalog {
    async fn version(&self, kind: Kind, name: &str) -> Result<VersionInfo, Error> {
        match kind {
            Kind::Cassandra => self.get::<CassandraVersion>(name).await,
            Kind::ClickHouse => self.get::<ClickHouseVersion>(name).await,
            Kind::Druid => self.get::<DruidVersion>(name).await,
            Kind::FerretDb => self.get::<FerretDBVersion>(name).await,
            Kind::Kafka => self.get::<KafkaVersion>(name).await,
            Kind::MsSqlServer => self.get::<MSSQLServerVersion>(name).await,
            Kind::Pgpool => self.get::<PgpoolVersion>(name).await,
            Kind::RabbitMq => self.get::<RabbitMQVersion>(name).await,
            Kind::Singlestore => self.get::<SinglestoreVersion>(name).await,
            Kind::Solr => self.get::<SolrVersion>(name).await,
            Kind::ZooKeeper => self.get::<ZooKeeperVersion>(name).await,
        }
    }
}

// -----------------------------------------------------------------------------
// StaticCatalog structure

/// in-memory catalog, it is filled from version manifests
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    versions: BTreeMap<(Kind, String), VersionInfo>,
}

impl StaticCatalog {
    pub fn insert(&mut self, kind: Kind, info: VersionInfo) {
        self.versions.insert((kind, info.name.to_owned()), info);
    }

    /// returns the catalog with an extra version named after itself and run
    /// by the given user
    pub fn with(mut self, kind: Kind, name: &str, run_as_user: Option<i64>) -> Self {
        self.insert(
            kind,
            VersionInfo {
                name: name.to_owned(),
                version: name.to_owned(),
                run_as_user,
                ..Default::default()
            },
        );

        self
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// parses a multi document yaml made of version objects
    #[cfg_attr(feature = "trace", tracing::instrument(skip(manifest)))]
    pub fn from_yaml(manifest: &str) -> Result<Self, Error> {
        let mut catalog = Self::default();

        for document in serde_yaml::Deserializer::from_str(manifest) {
            let value = serde_yaml::Value::deserialize(document).map_err(Error::Parse)?;
            if value.is_null() {
                continue;
            }

            let kind = value
                .get("kind")
                .and_then(serde_yaml::Value::as_str)
                .unwrap_or_default()
                .to_owned();

            let (database, info) = match kind.as_str() {
                "CassandraVersion" => parse::<CassandraVersion>(value)?,
                "ClickHouseVersion" => parse::<ClickHouseVersion>(value)?,
                "DruidVersion" => parse::<DruidVersion>(value)?,
                "FerretDBVersion" => parse::<FerretDBVersion>(value)?,
                "KafkaVersion" => parse::<KafkaVersion>(value)?,
                "MSSQLServerVersion" => parse::<MSSQLServerVersion>(value)?,
                "PgpoolVersion" => parse::<PgpoolVersion>(value)?,
                "RabbitMQVersion" => parse::<RabbitMQVersion>(value)?,
                "SinglestoreVersion" => parse::<SinglestoreVersion>(value)?,
                "SolrVersion" => parse::<SolrVersion>(value)?,
                "ZooKeeperVersion" => parse::<ZooKeeperVersion>(value)?,
                _ => return Err(Error::UnknownKind(kind)),
            };

            debug!(kind = database.as_kind(), name = &info.name, "Load version object");
            catalog.insert(database, info);
        }

        Ok(catalog)
    }
}

fn parse<T>(value: serde_yaml::Value) -> Result<(Kind, VersionInfo), Error>
where
    T: CatalogVersion,
{
    let obj: T = serde_yaml::from_value(value).map_err(Error::Parse)?;

    Ok((T::DATABASE, VersionInfo::from_version(&obj)))
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn version(&self, kind: Kind, name: &str) -> Result<VersionInfo, Error> {
        self.versions
            .get(&(kind, name.to_owned()))
            .cloned()
            .ok_or_else(|| Error::NotFound(kind, name.to_owned()))
    }
}
