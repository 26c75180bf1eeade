//! # ConfigMap module
//!
//! This module provide the command generating a configmap holding the
//! configuration of the admission server

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::Subcommand;
use k8s_openapi::api::core::v1;

use crate::{cmd::Executor, svc::cfg::Configuration};

// -----------------------------------------------------------------------------
// Constants

pub const CONFIGURATION_KEY: &str = "config.toml";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize configmap, {0}")]
    Serialize(serde_yaml::Error),
    #[error("failed to encode configuration, {0}")]
    Encode(toml::ser::Error),
}

// -----------------------------------------------------------------------------
// ConfigMap enumeration

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigMap {
    /// Generate configmap from the loaded configuration
    #[clap(name = "generate", aliases = &["g"])]
    Generate {
        /// Name of the configmap
        #[clap(short = 'n', long = "name")]
        name: Option<String>,
        /// Namespace of the configmap, defaults to the one of the webhook service
        #[clap(short = 'N', long = "namespace")]
        namespace: Option<String>,
    },
}

#[async_trait]
impl Executor for ConfigMap {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(
        &self,
        _kubeconfig: Option<PathBuf>,
        config: Arc<Configuration>,
    ) -> Result<(), Self::Error> {
        match self {
            Self::Generate { namespace, name } => {
                let configmap = generate(&config, namespace.to_owned(), name.to_owned())?;

                print!(
                    "{}",
                    serde_yaml::to_string(&configmap).map_err(Error::Serialize)?
                );
                Ok(())
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers

#[cfg_attr(feature = "trace", tracing::instrument)]
pub fn generate(
    config: &Configuration,
    namespace: Option<String>,
    name: Option<String>,
) -> Result<v1::ConfigMap, Error> {
    let mut configmap = v1::ConfigMap::default();
    let configuration = toml::to_string(config).map_err(Error::Encode)?;

    configmap.metadata.name = Some(name.unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned()));
    configmap.metadata.namespace =
        Some(namespace.unwrap_or_else(|| config.webhook.service.namespace.to_owned()));

    configmap.data = Some(BTreeMap::from([(
        CONFIGURATION_KEY.to_owned(),
        configuration,
    )]));

    Ok(configmap)
}
