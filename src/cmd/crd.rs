//! # Custom resource definition module
//!
//! This module provide the command printing the custom resource definitions
//! of the databases and of their version catalog

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::Subcommand;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition as Definition;
use kube::CustomResourceExt;

use crate::{
    cmd::Executor,
    svc::{
        cfg::Configuration,
        crd::{
            cassandra::Cassandra,
            clickhouse::ClickHouse,
            druid::Druid,
            ferretdb::FerretDB,
            kafka::Kafka,
            mssqlserver::MSSQLServer,
            pgpool::Pgpool,
            rabbitmq::RabbitMQ,
            singlestore::Singlestore,
            solr::Solr,
            version::{
                CassandraVersion, ClickHouseVersion, DruidVersion, FerretDBVersion, KafkaVersion,
                MSSQLServerVersion, PgpoolVersion, RabbitMQVersion, SinglestoreVersion,
                SolrVersion, ZooKeeperVersion,
            },
            zookeeper::ZooKeeper,
            Kind,
        },
    },
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize custom resource definition, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// CustomResourceDefinition enumeration

#[derive(Subcommand, Clone, Debug)]
pub enum CustomResourceDefinition {
    /// View custom resource definitions of a kind, or of all kinds
    #[clap(name = "view", aliases = &["v"])]
    View {
        #[clap(name = "kind")]
        kind: Option<Kind>,
    },
}

#[async_trait]
impl Executor for CustomResourceDefinition {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(_config)))]
    async fn execute(
        &self,
        _kubeconfig: Option<PathBuf>,
        _config: Arc<Configuration>,
    ) -> Result<(), Self::Error> {
        match self {
            Self::View { kind } => view(*kind),
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers

/// returns the definition of the database kind followed by the one of its
/// version objects
pub fn definitions(kind: Kind) -> [Definition; 2] {
    match kind {
        Kind::Cassandra => [Cassandra::crd(), CassandraVersion::crd()],
        Kind::ClickHouse => [ClickHouse::crd(), ClickHouseVersion::crd()],
        Kind::Druid => [Druid::crd(), DruidVersion::crd()],
        Kind::FerretDb => [FerretDB::crd(), FerretDBVersion::crd()],
        Kind::Kafka => [Kafka::crd(), KafkaVersion::crd()],
        Kind::MsSqlServer => [MSSQLServer::crd(), MSSQLServerVersion::crd()],
        Kind::Pgpool => [Pgpool::crd(), PgpoolVersion::crd()],
        Kind::RabbitMq => [RabbitMQ::crd(), RabbitMQVersion::crd()],
        Kind::Singlestore => [Singlestore::crd(), SinglestoreVersion::crd()],
        Kind::Solr => [Solr::crd(), SolrVersion::crd()],
        Kind::ZooKeeper => [ZooKeeper::crd(), ZooKeeperVersion::crd()],
    }
}

/// renders the definitions of the given kind, or of all kinds, as a multi
/// document yaml
pub fn render(kind: Option<Kind>) -> Result<String, Error> {
    let kinds = match kind {
        Some(kind) => vec![kind],
        None => Kind::ALL.to_vec(),
    };

    let documents = kinds
        .into_iter()
        .flat_map(definitions)
        .map(|crd| serde_yaml::to_string(&crd).map_err(Error::Serialize))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(documents.join("---\n"))
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub fn view(kind: Option<Kind>) -> Result<(), Error> {
    print!("{}", render(kind)?);
    Ok(())
}
