//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration

use std::{
    convert::TryFrom,
    fmt::{self, Display, Formatter},
    net::SocketAddr,
    path::PathBuf,
};

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8443";
pub const DEFAULT_SERVICE_NAME: &str = "kubedb-webhook";
pub const DEFAULT_SERVICE_NAMESPACE: &str = "kubedb";
pub const DEFAULT_SERVICE_PORT: i64 = 443;
pub const DEFAULT_FAILURE_POLICY: &str = "Fail";
pub const ENVIRONMENT_PREFIX: &str = "KUBEDB_WEBHOOK";

// -----------------------------------------------------------------------------
// Tls structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Tls {
    #[serde(rename = "certificate")]
    pub certificate: PathBuf,
    #[serde(rename = "key")]
    pub key: PathBuf,
}

// -----------------------------------------------------------------------------
// Server structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Server {
    #[serde(rename = "listen")]
    pub listen: SocketAddr,
    #[serde(rename = "tls", default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Tls>,
}

// -----------------------------------------------------------------------------
// FailurePolicy enumeration

/// behaviour of the api server when the webhook could not be reached
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum FailurePolicy {
    Fail,
    Ignore,
}

impl Display for FailurePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail => write!(f, "Fail"),
            Self::Ignore => write!(f, "Ignore"),
        }
    }
}

// -----------------------------------------------------------------------------
// Webhook structures

/// service in front of the webhook server, the api server reaches the webhook
/// through it
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Service {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "namespace")]
    pub namespace: String,
    #[serde(rename = "port")]
    pub port: i32,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Webhook {
    #[serde(rename = "failure_policy")]
    pub failure_policy: FailurePolicy,
    #[serde(rename = "service")]
    pub service: Service,
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to load file '{0:?}', {1}")]
    File(PathBuf, ConfigError),
    #[error("failed to load configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "server")]
    pub server: Server,
    #[serde(rename = "webhook")]
    pub webhook: Webhook,
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument)]
    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        defaults()?
            .add_source(environment())
            .add_source(File::from(path.to_owned()).required(true))
            .build()
            .map_err(|err| Error::File(path, err))?
            .try_deserialize()
            .map_err(Error::Cast)
    }
}

impl Configuration {
    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn try_default() -> Result<Self, Error> {
        let mut paths = vec![
            PathBuf::from(format!("/usr/share/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!("/etc/{}/config", env!("CARGO_PKG_NAME"))),
        ];

        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            paths.push(home.join(".config").join(env!("CARGO_PKG_NAME")).join("config"));
            paths.push(
                home.join(".local")
                    .join("share")
                    .join(env!("CARGO_PKG_NAME"))
                    .join("config"),
            );
        }

        paths.push(PathBuf::from("config"));

        paths
            .into_iter()
            .fold(defaults()?, |builder, path| {
                builder.add_source(File::from(path).required(false))
            })
            .add_source(environment())
            .build()
            .map_err(Error::Cast)?
            .try_deserialize()
            .map_err(Error::Cast)
    }

    /// logs the effective configuration
    pub fn help(&self) {
        info!(
            listen = self.server.listen.to_string(),
            tls = self.server.tls.is_some(),
            "Configuration of the admission server"
        );

        if let Some(tls) = &self.server.tls {
            info!(
                certificate = tls.certificate.display().to_string(),
                key = tls.key.display().to_string(),
                "Configuration of the transport layer security"
            );
        }

        info!(
            service = self.webhook.service.name.as_str(),
            namespace = self.webhook.service.namespace.as_str(),
            port = self.webhook.service.port,
            failure_policy = self.webhook.failure_policy.to_string(),
            "Configuration of the webhook registration"
        );
    }
}

// -----------------------------------------------------------------------------
// Helpers

fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, Error> {
    let mut builder = Config::builder();

    for (key, value) in [
        ("server.listen", DEFAULT_LISTEN),
        ("webhook.failure_policy", DEFAULT_FAILURE_POLICY),
        ("webhook.service.name", DEFAULT_SERVICE_NAME),
        ("webhook.service.namespace", DEFAULT_SERVICE_NAMESPACE),
    ] {
        builder = builder
            .set_default(key, value)
            .map_err(|err| Error::Default(key.to_owned(), err))?;
    }

    builder
        .set_default("webhook.service.port", DEFAULT_SERVICE_PORT)
        .map_err(|err| Error::Default("webhook.service.port".to_owned(), err))
}

fn environment() -> Environment {
    Environment::with_prefix(ENVIRONMENT_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
