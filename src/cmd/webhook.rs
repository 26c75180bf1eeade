//! # Webhook configuration module
//!
//! This module provide the command printing the mutating and validating
//! webhook configurations registering the admission server to the api server

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::Subcommand;
use k8s_openapi::{
    api::admissionregistration::v1::{
        MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
        ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
    ByteString,
};
use tracing::warn;

use crate::{
    cmd::Executor,
    svc::{
        cfg::Configuration,
        crd::{Kind, GROUP, VERSION},
        webhook::{Action, Route},
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const MUTATORS: &str = "mutators.kubedb.com";
pub const VALIDATORS: &str = "validators.kubedb.com";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize webhook configuration, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// WebhookConfiguration enumeration

#[derive(Subcommand, Clone, Debug)]
pub enum WebhookConfiguration {
    /// View mutating and validating webhook configurations of a kind, or of all kinds
    #[clap(name = "view", aliases = &["v"])]
    View {
        #[clap(name = "kind")]
        kind: Option<Kind>,
    },
}

#[async_trait]
impl Executor for WebhookConfiguration {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(
        &self,
        _kubeconfig: Option<PathBuf>,
        config: Arc<Configuration>,
    ) -> Result<(), Self::Error> {
        match self {
            Self::View { kind } => view(&config, *kind),
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers

/// returns the certificate served by the admission server, the api server
/// trusts it to reach the webhook
fn ca_bundle(config: &Configuration) -> Option<ByteString> {
    let tls = config.server.tls.as_ref()?;

    match std::fs::read(&tls.certificate) {
        Ok(pem) => Some(ByteString(pem)),
        Err(err) => {
            warn!(
                path = tls.certificate.display().to_string(),
                error = err.to_string(),
                "Could not read certificate, webhook configurations are rendered without ca bundle"
            );
            None
        }
    }
}

fn client_config(config: &Configuration, route: Route) -> WebhookClientConfig {
    let service = &config.webhook.service;

    WebhookClientConfig {
        ca_bundle: ca_bundle(config),
        service: Some(ServiceReference {
            name: service.name.to_owned(),
            namespace: service.namespace.to_owned(),
            path: Some(route.path()),
            port: Some(service.port),
        }),
        url: None,
    }
}

fn rule(kind: Kind, operations: &[&str]) -> RuleWithOperations {
    RuleWithOperations {
        api_groups: Some(vec![GROUP.to_owned()]),
        api_versions: Some(vec![VERSION.to_owned()]),
        operations: Some(operations.iter().map(|op| op.to_string()).collect()),
        resources: Some(vec![kind.plural()]),
        scope: Some("Namespaced".to_owned()),
    }
}

fn kinds(kind: Option<Kind>) -> Vec<Kind> {
    match kind {
        Some(kind) => vec![kind],
        None => Kind::ALL.to_vec(),
    }
}

/// returns the configuration routing creation and update of databases to the
/// mutating endpoints
pub fn mutating(config: &Configuration, kind: Option<Kind>) -> MutatingWebhookConfiguration {
    let webhooks = kinds(kind)
        .into_iter()
        .map(|kind| MutatingWebhook {
            name: format!("{}.{}", kind.plural(), MUTATORS),
            admission_review_versions: vec!["v1".to_owned()],
            client_config: client_config(config, Route::new(Action::Mutate, kind)),
            failure_policy: Some(config.webhook.failure_policy.to_string()),
            rules: Some(vec![rule(kind, &["CREATE", "UPDATE"])]),
            side_effects: "None".to_owned(),
            ..Default::default()
        })
        .collect();

    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(MUTATORS.to_owned()),
            ..Default::default()
        },
        webhooks: Some(webhooks),
    }
}

/// returns the configuration routing creation, update and deletion of
/// databases to the validating endpoints
pub fn validating(config: &Configuration, kind: Option<Kind>) -> ValidatingWebhookConfiguration {
    let webhooks = kinds(kind)
        .into_iter()
        .map(|kind| ValidatingWebhook {
            name: format!("{}.{}", kind.plural(), VALIDATORS),
            admission_review_versions: vec!["v1".to_owned()],
            client_config: client_config(config, Route::new(Action::Validate, kind)),
            failure_policy: Some(config.webhook.failure_policy.to_string()),
            rules: Some(vec![rule(kind, &["CREATE", "UPDATE", "DELETE"])]),
            side_effects: "None".to_owned(),
            ..Default::default()
        })
        .collect();

    ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(VALIDATORS.to_owned()),
            ..Default::default()
        },
        webhooks: Some(webhooks),
    }
}

#[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
pub fn view(config: &Configuration, kind: Option<Kind>) -> Result<(), Error> {
    let documents = [
        serde_yaml::to_string(&mutating(config, kind)).map_err(Error::Serialize)?,
        serde_yaml::to_string(&validating(config, kind)).map_err(Error::Serialize)?,
    ];

    print!("{}", documents.join("---\n"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{io::Write, path::PathBuf};

    use super::*;
    use crate::svc::cfg::{FailurePolicy, Server, Service, Tls, Webhook};

    fn configuration(tls: Option<Tls>) -> Configuration {
        Configuration {
            server: Server {
                listen: "0.0.0.0:8443".parse().expect("address to be valid"),
                tls,
            },
            webhook: Webhook {
                failure_policy: FailurePolicy::Ignore,
                service: Service {
                    name: "kubedb-webhook".to_owned(),
                    namespace: "kubedb".to_owned(),
                    port: 443,
                },
            },
        }
    }

    #[test]
    fn mutating_webhooks_point_to_the_service() {
        let config = configuration(None);
        let configuration = mutating(&config, Some(Kind::Solr));
        let webhooks = configuration.webhooks.expect("webhooks to be set");

        assert_eq!(1, webhooks.len());
        assert_eq!("solrs.mutators.kubedb.com", webhooks[0].name);
        assert_eq!(Some("Ignore".to_owned()), webhooks[0].failure_policy);
        assert_eq!(None, webhooks[0].client_config.ca_bundle);

        let service = webhooks[0]
            .client_config
            .service
            .as_ref()
            .expect("service to be set");

        assert_eq!("kubedb-webhook", service.name);
        assert_eq!("kubedb", service.namespace);
        assert_eq!(Some(443), service.port);
        assert_eq!(
            Some("/mutate-kubedb-com-v1alpha2-solr".to_owned()),
            service.path
        );
    }

    #[test]
    fn validating_webhooks_cover_deletion() {
        let config = configuration(None);
        let configuration = validating(&config, None);
        let webhooks = configuration.webhooks.expect("webhooks to be set");

        assert_eq!(Kind::ALL.len(), webhooks.len());
        for webhook in webhooks {
            let rules = webhook.rules.expect("rules to be set");
            let operations = rules[0].operations.as_ref().expect("operations to be set");

            assert!(operations.contains(&"DELETE".to_owned()), "{}", webhook.name);
            assert!(webhook.name.ends_with(VALIDATORS));
        }
    }

    #[test]
    fn certificate_is_given_as_ca_bundle() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAECAwQ=\n-----END CERTIFICATE-----\n";
        let mut file = tempfile::NamedTempFile::new().expect("temporary file to be created");
        file.write_all(pem.as_bytes())
            .expect("certificate to be written");

        let config = configuration(Some(Tls {
            certificate: file.path().to_owned(),
            key: PathBuf::from("/nonexistent/tls.key"),
        }));

        let configuration = mutating(&config, Some(Kind::Kafka));
        let webhooks = configuration.webhooks.expect("webhooks to be set");

        assert_eq!(
            Some(ByteString(pem.as_bytes().to_vec())),
            webhooks[0].client_config.ca_bundle
        );
    }

    #[test]
    fn unreadable_certificate_is_skipped() {
        let config = configuration(Some(Tls {
            certificate: PathBuf::from("/nonexistent/tls.crt"),
            key: PathBuf::from("/nonexistent/tls.key"),
        }));

        assert_eq!(None, ca_bundle(&config));
    }
}
