//! # Command module
//!
//! This module provide command line interface structures and helpers
use std::{io, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};

use crate::{
    logging::Format,
    svc::{
        catalog::{Catalog, KubeCatalog},
        cfg::Configuration,
        http::server,
        k8s::client,
    },
};

pub mod configmap;
pub mod crd;
pub mod validate;
pub mod webhook;

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(
        &self,
        kubeconfig: Option<PathBuf>,
        config: Arc<Configuration>,
    ) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<Error>),
    #[error("failed to execute command, {0}")]
    CustomResourceDefinition(crd::Error),
    #[error("failed to execute command, {0}")]
    WebhookConfiguration(webhook::Error),
    #[error("failed to execute command, {0}")]
    ConfigMap(configmap::Error),
    #[error("failed to execute command, {0}")]
    Validate(validate::Error),
    #[error("failed to handle termination signal, {0}")]
    SigTerm(io::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to serve admission requests, {0}")]
    Serve(server::Error),
    #[error("failed to wait for the admission server to complete, {0}")]
    Join(tokio::task::JoinError),
}

// -----------------------------------------------------------------------------
// Command enumeration

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Interact with custom resource definitions
    #[clap(name = "custom-resource-definition", aliases = &["crd"], subcommand)]
    CustomResourceDefinition(crd::CustomResourceDefinition),
    /// Interact with webhook configurations
    #[clap(name = "webhook-configuration", aliases = &["wh"], subcommand)]
    WebhookConfiguration(webhook::WebhookConfiguration),
    /// Interact with configmap
    #[clap(name = "configmap", aliases = &["cm"], subcommand)]
    ConfigMap(configmap::ConfigMap),
    /// Default and validate database manifests
    #[clap(name = "validate", aliases = &["val"])]
    Validate(validate::Validate),
}

#[async_trait]
impl Executor for Command {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(
        &self,
        kubeconfig: Option<PathBuf>,
        config: Arc<Configuration>,
    ) -> Result<(), Self::Error> {
        match self {
            Self::CustomResourceDefinition(crd) => crd
                .execute(kubeconfig, config)
                .await
                .map_err(Error::CustomResourceDefinition)
                .map_err(|err| Error::Execution("custom-resource-definition".into(), Arc::new(err))),
            Self::WebhookConfiguration(wh) => wh
                .execute(kubeconfig, config)
                .await
                .map_err(Error::WebhookConfiguration)
                .map_err(|err| Error::Execution("webhook-configuration".into(), Arc::new(err))),
            Self::ConfigMap(cm) => cm
                .execute(kubeconfig, config)
                .await
                .map_err(Error::ConfigMap)
                .map_err(|err| Error::Execution("configmap".into(), Arc::new(err))),
            Self::Validate(validate) => validate
                .execute(kubeconfig, config)
                .await
                .map_err(Error::Validate)
                .map_err(|err| Error::Execution("validate".into(), Arc::new(err))),
        }
    }
}

// -----------------------------------------------------------------------------
// Args structure

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[clap(short = 'v', global = true, action = ArgAction::Count)]
    pub verbosity: u8,
    /// Format of log events
    #[clap(long = "log-format", global = true, value_enum, default_value_t = Format::Plain)]
    pub log_format: Format,
    /// Specify location of kubeconfig
    #[clap(short = 'k', long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,
    /// Specify location of configuration
    #[clap(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[clap(short = 't', long = "check", global = true)]
    pub check: bool,
    #[clap(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// daemon function

#[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
pub async fn daemon(kubeconfig: Option<PathBuf>, config: Arc<Configuration>) -> Result<(), Error> {
    // -------------------------------------------------------------------------
    // Create a new kubernetes client from path if defined, or via the
    // environment or defaults locations
    let kube_client = client::try_new(kubeconfig)
        .await
        .map_err(Error::Client)?;

    let catalog: Arc<dyn Catalog> = Arc::new(KubeCatalog::from(kube_client));

    // -------------------------------------------------------------------------
    // Start the admission server
    let mut handle = tokio::spawn(async move { server::serve(&config.server, catalog).await });

    // -------------------------------------------------------------------------
    // Wait for termination signal or for the server to stop
    let completed = tokio::select! {
        result = &mut handle => Some(result),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(Error::SigTerm)?;
            None
        }
    };

    match completed {
        Some(Ok(result)) => result.map_err(Error::Serve),
        Some(Err(err)) => Err(Error::Join(err)),
        None => {
            info!("Receive termination signal, stop the admission server");
            handle.abort();

            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!(
                        error = err.to_string(),
                        "Could not wait for the admission server to complete"
                    );
                }
            }

            Ok(())
        }
    }
}
