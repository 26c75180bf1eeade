//! # Webhook module
//!
//! This module provide the admission handlers called by the kubernetes api
//! server. The mutating handler answers with a json patch filling the defaults
//! of the database, the validating one allows or denies the request.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use kube::{
    core::{
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
        DynamicObject,
    },
    ResourceExt,
};
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use tracing::{debug, info, warn};

use crate::svc::{
    catalog::Catalog,
    crd::{
        cassandra::Cassandra, clickhouse::ClickHouse, druid::Druid, ferretdb::FerretDB,
        kafka::Kafka, mssqlserver::MSSQLServer, pgpool::Pgpool, rabbitmq::RabbitMQ,
        singlestore::Singlestore, solr::Solr, zookeeper::ZooKeeper, Database, Kind, GROUP,
        VERSION,
    },
    k8s::{field::Invalid, resource},
};

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static ADMISSION_REVIEW: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubedb_webhook_admission_review",
            "number of admission review handled by the webhook",
        ),
        &["kind", "action", "operation", "outcome"]
    )
    .expect("metrics 'kubedb_webhook_admission_review' to not be already registered")
});

// -----------------------------------------------------------------------------
// Action enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Action {
    Mutate,
    Validate,
}

impl Action {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mutate => "mutate",
            Self::Validate => "validate",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// -----------------------------------------------------------------------------
// Route structure

/// a webhook endpoint, e.g. `/mutate-kubedb-com-v1alpha2-kafka`
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Route {
    pub action: Action,
    pub kind: Kind,
}

impl Route {
    pub const fn new(action: Action, kind: Kind) -> Self {
        Self { action, kind }
    }

    /// returns the routes of every kind for both actions
    pub fn all() -> Vec<Self> {
        [Action::Mutate, Action::Validate]
            .into_iter()
            .flat_map(|action| Kind::ALL.into_iter().map(move |kind| Self::new(action, kind)))
            .collect()
    }

    pub fn path(&self) -> String {
        format!(
            "/{}-{}-{}-{}",
            self.action,
            GROUP.replace('.', "-"),
            VERSION,
            self.kind.singular()
        )
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl FromStr for Route {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (action, rest) = if let Some(rest) = s.strip_prefix("/mutate-") {
            (Action::Mutate, rest)
        } else if let Some(rest) = s.strip_prefix("/validate-") {
            (Action::Validate, rest)
        } else {
            return Err(format!("failed to parse route '{}', unknown action", s));
        };

        let prefix = format!("{}-{}-", GROUP.replace('.', "-"), VERSION);
        let kind = rest
            .strip_prefix(&prefix)
            .ok_or_else(|| format!("failed to parse route '{}', unknown group or version", s))?;

        Kind::ALL
            .into_iter()
            .find(|k| k.singular() == kind)
            .map(|kind| Self::new(action, kind))
            .ok_or_else(|| format!("failed to parse route '{}', unknown kind '{}'", s, kind))
    }
}

// -----------------------------------------------------------------------------
// Review helpers

/// handles the serialized admission review sent by the api server to the
/// given route, a malformed review is answered with an invalid response
#[cfg_attr(feature = "trace", tracing::instrument(skip(catalog, body)))]
pub async fn review(
    route: Route,
    catalog: &dyn Catalog,
    body: &[u8],
) -> AdmissionReview<DynamicObject> {
    match route.kind {
        Kind::Cassandra => handle::<Cassandra>(route.action, catalog, body).await,
        Kind::ClickHouse => handle::<ClickHouse>(route.action, catalog, body).await,
        Kind::Druid => handle::<Druid>(route.action, catalog, body).await,
        Kind::FerretDb => handle::<FerretDB>(route.action, catalog, body).await,
        Kind::Kafka => handle::<Kafka>(route.action, catalog, body).await,
        Kind::MsSqlServer => handle::<MSSQLServer>(route.action, catalog, body).await,
        Kind::Pgpool => handle::<Pgpool>(route.action, catalog, body).await,
        Kind::RabbitMq => handle::<RabbitMQ>(route.action, catalog, body).await,
        Kind::Singlestore => handle::<Singlestore>(route.action, catalog, body).await,
        Kind::Solr => handle::<Solr>(route.action, catalog, body).await,
        Kind::ZooKeeper => handle::<ZooKeeper>(route.action, catalog, body).await,
    }
}

async fn handle<K>(action: Action, catalog: &dyn Catalog, body: &[u8]) -> AdmissionReview<DynamicObject>
where
    K: Database,
{
    let req: AdmissionRequest<K> = match serde_json::from_slice::<AdmissionReview<K>>(body)
        .map_err(|err| format!("failed to deserialize admission review, {}", err))
        .and_then(|review| {
            review
                .try_into()
                .map_err(|err| format!("failed to convert admission review, {}", err))
        }) {
        Ok(req) => req,
        Err(err) => {
            warn!(
                kind = K::KIND.as_kind(),
                action = action.as_str(),
                error = err.as_str(),
                "Could not read admission review"
            );

            #[cfg(feature = "metrics")]
            ADMISSION_REVIEW
                .with_label_values(&[K::KIND.as_kind(), action.as_str(), "unknown", "invalid"])
                .inc();

            return AdmissionResponse::invalid(err).into_review();
        }
    };

    let res = match action {
        Action::Mutate => mutate(catalog, &req).await,
        Action::Validate => validate(catalog, &req).await,
    };

    let outcome = if res.allowed { "allowed" } else { "denied" };
    let operation = format!("{:?}", req.operation).to_uppercase();
    info!(
        kind = K::KIND.as_kind(),
        action = action.as_str(),
        operation = operation.as_str(),
        name = req.name.as_str(),
        namespace = req.namespace.as_deref().unwrap_or_default(),
        outcome = outcome,
        "Handle admission review"
    );

    #[cfg(feature = "metrics")]
    ADMISSION_REVIEW
        .with_label_values(&[K::KIND.as_kind(), action.as_str(), &operation, outcome])
        .inc();

    res.into_review()
}

/// fills the defaults of the object under review, the response carries the
/// json patch from the received object to the defaulted one
pub async fn mutate<K>(catalog: &dyn Catalog, req: &AdmissionRequest<K>) -> AdmissionResponse
where
    K: Database,
{
    let res = AdmissionResponse::from(req);
    let obj = match &req.object {
        Some(obj) => obj,
        None => return res,
    };

    let mut modified = obj.to_owned();
    modified.set_defaults(catalog).await;

    let patch = match resource::diff(obj, &modified) {
        Ok(patch) => patch,
        Err(err) => return res.deny(format!("failed to compute patch, {}", err)),
    };

    debug!(
        kind = K::KIND.as_kind(),
        name = obj.name_any(),
        operations = patch.0.len(),
        "Compute patch of defaults"
    );

    match res.with_patch(patch) {
        Ok(res) => res,
        Err(err) => AdmissionResponse::from(req).deny(format!("failed to serialize patch, {}", err)),
    }
}

/// allows or denies the request depending on its operation, creation and
/// update check the new object while deletion checks the stored one
pub async fn validate<K>(catalog: &dyn Catalog, req: &AdmissionRequest<K>) -> AdmissionResponse
where
    K: Database,
{
    let res = AdmissionResponse::from(req);
    let result = match (&req.operation, &req.object, &req.old_object) {
        (Operation::Create, Some(obj), _) => obj.validate_create(catalog).await,
        (Operation::Update, Some(obj), old) => {
            obj.validate_update(old.as_ref().unwrap_or(obj), catalog)
                .await
        }
        (Operation::Delete, _, Some(old)) => old.validate_delete(),
        _ => Ok(()),
    };

    match result {
        Ok(()) => res,
        Err(err) => deny(res, &err),
    }
}

/// denies the request with the status the api server gives to invalid objects
pub fn deny(res: AdmissionResponse, err: &Invalid) -> AdmissionResponse {
    let mut res = res.deny(err.to_string());
    res.result.code = Invalid::CODE;
    res.result.reason = Invalid::REASON.to_owned();
    res
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::svc::catalog::StaticCatalog;

    fn catalog() -> StaticCatalog {
        StaticCatalog::default()
            .with(Kind::ZooKeeper, "3.8.3", Some(1000))
            .with(Kind::Kafka, "3.6.1", Some(1001))
    }

    fn body(operation: &str, object: Value, old_object: Value) -> Vec<u8> {
        review_body(Kind::ZooKeeper, operation, object, old_object)
    }

    fn review_body(kind: Kind, operation: &str, object: Value, old_object: Value) -> Vec<u8> {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": GROUP, "version": VERSION, "kind": kind.as_kind()},
                "resource": {"group": GROUP, "version": VERSION, "resource": kind.plural()},
                "name": "zk",
                "namespace": "demo",
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": old_object,
                "dryRun": false
            }
        })
        .to_string()
        .into_bytes()
    }

    fn zookeeper(spec: Value) -> Value {
        json!({
            "apiVersion": "kubedb.com/v1alpha2",
            "kind": "ZooKeeper",
            "metadata": {"name": "zk", "namespace": "demo"},
            "spec": spec
        })
    }

    #[test]
    fn routes_are_parsed_from_paths() {
        let route = Route::new(Action::Mutate, Kind::RabbitMq);
        assert_eq!("/mutate-kubedb-com-v1alpha2-rabbitmq", route.path());
        assert_eq!(Ok(route), route.path().parse());
        assert_eq!(
            Ok(Route::new(Action::Validate, Kind::ClickHouse)),
            "/validate-kubedb-com-v1alpha2-clickhouse".parse()
        );

        assert!("/validate-kubedb-com-v1alpha2-postgres".parse::<Route>().is_err());
        assert!("/validate-apps-v1-kafka".parse::<Route>().is_err());
        assert!("/healthz".parse::<Route>().is_err());
        assert_eq!(22, Route::all().len());
    }

    #[tokio::test]
    async fn mutation_answers_with_a_patch() {
        let body = body(
            "CREATE",
            zookeeper(json!({"version": "3.8.3", "replicas": 3})),
            Value::Null,
        );

        let review = review(Route::new(Action::Mutate, Kind::ZooKeeper), &catalog(), &body).await;
        let res = review.response.expect("review to carry a response");
        assert!(res.allowed);

        let patch: Value = serde_json::from_slice(&res.patch.expect("response to carry a patch"))
            .expect("patch to be json");
        let operations = patch.as_array().expect("patch to be a list of operations");
        assert!(operations.iter().any(|op| op["path"] == "/spec/deletionPolicy"
            && op["value"] == "Delete"));
        assert!(!operations.iter().any(|op| op["path"] == "/spec/replicas"));
    }

    fn kafka(spec: Value) -> Value {
        json!({
            "apiVersion": "kubedb.com/v1alpha2",
            "kind": "Kafka",
            "metadata": {"name": "kf", "namespace": "demo"},
            "spec": spec
        })
    }

    #[tokio::test]
    async fn empty_policies_are_defaulted() {
        let object = kafka(json!({
            "version": "3.6.1",
            "replicas": 3,
            "storageType": "",
            "terminationPolicy": ""
        }));

        let review = review(
            Route::new(Action::Mutate, Kind::Kafka),
            &catalog(),
            &review_body(Kind::Kafka, "CREATE", object.to_owned(), Value::Null),
        )
        .await;
        let res = review.response.expect("review to carry a response");
        assert!(res.allowed);

        let patch: json_patch::Patch =
            serde_json::from_slice(&res.patch.expect("response to carry a patch"))
                .expect("patch to be json");
        let operations = serde_json::to_value(&patch).expect("patch to be serialized");
        let operations = operations.as_array().expect("patch to be a list of operations");
        assert!(operations.iter().any(|op| op["path"] == "/spec/terminationPolicy"
            && op["value"] == "Delete"));
        assert!(operations.iter().any(|op| op["path"] == "/spec/storageType"
            && op["value"] == "Durable"));

        let mut patched = object;
        json_patch::patch(&mut patched, &patch).expect("patch to apply");

        let review = super::review(
            Route::new(Action::Validate, Kind::Kafka),
            &catalog(),
            &review_body(Kind::Kafka, "CREATE", patched, Value::Null),
        )
        .await;
        let res = review.response.expect("review to carry a response");
        assert!(res.allowed, "{}", res.result.message);
    }

    #[tokio::test]
    async fn empty_termination_policy_does_not_forbid_deletion() {
        let body = review_body(
            Kind::Kafka,
            "DELETE",
            Value::Null,
            kafka(json!({"version": "3.6.1", "storageType": "Durable", "terminationPolicy": ""})),
        );

        let review = review(Route::new(Action::Validate, Kind::Kafka), &catalog(), &body).await;
        let res = review.response.expect("review to carry a response");
        assert!(res.allowed);
    }

    #[tokio::test]
    async fn validation_denies_invalid_objects() {
        let body = body(
            "CREATE",
            zookeeper(json!({"version": "3.8.3", "replicas": 2})),
            Value::Null,
        );

        let review = review(Route::new(Action::Validate, Kind::ZooKeeper), &catalog(), &body).await;
        let res = review.response.expect("review to carry a response");

        assert!(!res.allowed);
        assert_eq!(422, res.result.code);
        assert_eq!("Invalid", res.result.reason);
        assert!(res
            .result
            .message
            .starts_with(r#"ZooKeeper.kubedb.com "zk" is invalid: spec.replicas"#));
    }

    #[tokio::test]
    async fn deletion_is_checked_on_stored_object() {
        let body = body(
            "DELETE",
            Value::Null,
            zookeeper(json!({"version": "3.8.3", "deletionPolicy": "DoNotTerminate"})),
        );

        let review = review(Route::new(Action::Validate, Kind::ZooKeeper), &catalog(), &body).await;
        let res = review.response.expect("review to carry a response");

        assert!(!res.allowed);
        assert!(res
            .result
            .message
            .ends_with("Can not delete as terminationPolicy is set to \"DoNotTerminate\""));
    }

    #[tokio::test]
    async fn malformed_reviews_are_answered() {
        let review = review(
            Route::new(Action::Validate, Kind::ZooKeeper),
            &catalog(),
            b"{\"kind\": \"Pod\"}",
        )
        .await;

        let res = review.response.expect("review to carry a response");
        assert!(!res.allowed);
    }
}
