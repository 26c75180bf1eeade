//! # Validate module
//!
//! This module provide the command running the admission logic on manifests
//! offline, objects are defaulted, validated and printed back.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use async_trait::async_trait;
use clap::Args;
use kube::ResourceExt;
use serde::Deserialize;
use tracing::info;

use crate::{
    cmd::Executor,
    svc::{
        catalog::{self, Catalog, KubeCatalog, StaticCatalog},
        cfg::Configuration,
        crd::{
            cassandra::Cassandra, clickhouse::ClickHouse, druid::Druid, ferretdb::FerretDB,
            kafka::Kafka, mssqlserver::MSSQLServer, pgpool::Pgpool, rabbitmq::RabbitMQ,
            singlestore::Singlestore, solr::Solr, zookeeper::ZooKeeper, Database, Kind,
        },
        k8s::{client, field::Invalid},
    },
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read file '{0}', {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse manifest, {0}")]
    Parse(serde_yaml::Error),
    #[error("failed to parse manifest, {0}")]
    Kind(String),
    #[error("failed to load catalog, {0}")]
    Catalog(catalog::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to serialize object, {0}")]
    Serialize(serde_yaml::Error),
    #[error("{0}")]
    Invalid(Invalid),
}

// -----------------------------------------------------------------------------
// Validate structure

#[derive(Args, Clone, Debug)]
pub struct Validate {
    /// Manifest of the databases to default and validate
    #[clap(short = 'f', long = "file")]
    pub file: PathBuf,
    /// Manifest of version objects, versions are looked up in the cluster otherwise
    #[clap(long = "catalog")]
    pub catalog: Option<PathBuf>,
}

#[async_trait]
impl Executor for Validate {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(_config)))]
    async fn execute(
        &self,
        kubeconfig: Option<PathBuf>,
        _config: Arc<Configuration>,
    ) -> Result<(), Self::Error> {
        let catalog: Box<dyn Catalog> = match &self.catalog {
            Some(path) => Box::new(
                StaticCatalog::from_yaml(&read(path).await?).map_err(Error::Catalog)?,
            ),
            None => Box::new(KubeCatalog::from(
                client::try_new(kubeconfig).await.map_err(Error::Client)?,
            )),
        };

        let manifest = read(&self.file).await?;
        print!("{}", validate(catalog.as_ref(), &manifest).await?);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Helpers

async fn read(path: &Path) -> Result<String, Error> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::Read(path.to_owned(), err))
}

/// defaults then validates each database of the multi document manifest, the
/// defaulted objects are returned as a multi document yaml
pub async fn validate(catalog: &dyn Catalog, manifest: &str) -> Result<String, Error> {
    // the yaml deserializer is not `Send`, documents are parsed before any await
    let values = serde_yaml::Deserializer::from_str(manifest)
        .map(serde_yaml::Value::deserialize)
        .collect::<Result<Vec<_>, _>>()
        .map_err(Error::Parse)?;

    let mut documents = vec![];
    for value in values.into_iter().filter(|value| !value.is_null()) {
        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default();

        let document = match Kind::from_str(kind).map_err(Error::Kind)? {
            Kind::Cassandra => check::<Cassandra>(catalog, value).await?,
            Kind::ClickHouse => check::<ClickHouse>(catalog, value).await?,
            Kind::Druid => check::<Druid>(catalog, value).await?,
            Kind::FerretDb => check::<FerretDB>(catalog, value).await?,
            Kind::Kafka => check::<Kafka>(catalog, value).await?,
            Kind::MsSqlServer => check::<MSSQLServer>(catalog, value).await?,
            Kind::Pgpool => check::<Pgpool>(catalog, value).await?,
            Kind::RabbitMq => check::<RabbitMQ>(catalog, value).await?,
            Kind::Singlestore => check::<Singlestore>(catalog, value).await?,
            Kind::Solr => check::<Solr>(catalog, value).await?,
            Kind::ZooKeeper => check::<ZooKeeper>(catalog, value).await?,
        };

        documents.push(document);
    }

    Ok(documents.join("---\n"))
}

async fn check<K>(catalog: &dyn Catalog, value: serde_yaml::Value) -> Result<String, Error>
where
    K: Database,
{
    let mut obj: K = serde_yaml::from_value(value).map_err(Error::Parse)?;

    obj.set_defaults(catalog).await;
    obj.validate_create(catalog).await.map_err(Error::Invalid)?;

    info!(
        kind = K::KIND.as_kind(),
        name = obj.name_any(),
        "Object is valid"
    );

    serde_yaml::to_string(&obj).map_err(Error::Serialize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StaticCatalog {
        StaticCatalog::default()
            .with(Kind::Kafka, "3.6.1", Some(1001))
            .with(Kind::ZooKeeper, "3.8.3", Some(1000))
            .with(Kind::Pgpool, "4.5.0", Some(70))
    }

    #[tokio::test]
    async fn valid_manifests_are_defaulted() {
        let manifest = r#"
apiVersion: kubedb.com/v1alpha2
kind: ZooKeeper
metadata:
  name: zk
  namespace: demo
spec:
  version: 3.8.3
  replicas: 3
---
apiVersion: kubedb.com/v1alpha2
kind: ZooKeeper
metadata:
  name: zk-single
  namespace: demo
spec:
  version: 3.8.3
"#;

        let output = validate(&catalog(), manifest)
            .await
            .expect("manifest to be valid");

        assert_eq!(2, output.matches("kind: ZooKeeper").count());
        assert!(output.contains("deletionPolicy: Delete"));
        assert!(output.contains("replicas: 1"));
    }

    #[tokio::test]
    async fn invalid_manifests_are_reported() {
        let manifest = r#"
apiVersion: kubedb.com/v1alpha2
kind: ZooKeeper
metadata:
  name: zk
  namespace: demo
spec:
  version: 3.4.0
"#;

        let err = validate(&catalog(), manifest)
            .await
            .expect_err("unknown version to be refused");

        assert!(matches!(err, Error::Invalid(_)));
        assert!(err.to_string().contains("spec.version"));
    }

    #[tokio::test]
    async fn pgpool_manifests_are_dispatched() {
        let manifest = r#"
apiVersion: kubedb.com/v1alpha2
kind: Pgpool
metadata:
  name: pp
  namespace: demo
spec:
  version: 4.5.0
  postgresRef:
    name: ha-postgres
    namespace: demo
  terminationPolicy: ""
"#;

        let output = validate(&catalog(), manifest)
            .await
            .expect("manifest to be valid");

        assert!(output.contains("kind: Pgpool"));
        assert!(output.contains("terminationPolicy: Delete"));
        assert!(output.contains("sslMode: disable"));
    }

    #[tokio::test]
    async fn unknown_kinds_are_refused() {
        let manifest = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: cfg
"#;

        let err = validate(&catalog(), manifest)
            .await
            .expect_err("configmap to be refused");

        assert!(matches!(err, Error::Kind(_)));
    }
}
