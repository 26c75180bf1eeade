//! # HTTP module
//!
//! This module provide the router of the admission server, it dispatches the
//! webhook endpoints, the health check and the metrics.

use std::{collections::BTreeMap, error::Error as StdError, sync::Arc, time::Instant};

use http_body::{LengthLimitError, Limited};
use hyper::{
    header::{self, HeaderValue},
    Body, Method, Request, Response, StatusCode,
};
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use tracing::info;

use crate::svc::{
    catalog::Catalog,
    webhook::{self, Route},
};

#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod tls;

// -----------------------------------------------------------------------------
// Constants

/// maximum size of an admission review body, it matches the request size limit
/// of the kubernetes api server
pub const MAX_BODY_SIZE: usize = 3 * 1024 * 1024;

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static SERVER_REQUEST_SUCCESS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubedb_webhook_server_request_success",
            "number of successful request handled by the server",
        ),
        &["method", "path", "status"]
    )
    .expect("metrics 'kubedb_webhook_server_request_success' to not be already registered")
});

#[cfg(feature = "metrics")]
static SERVER_REQUEST_FAILURE: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubedb_webhook_server_request_failure",
            "number of failed request handled by the server",
        ),
        &["method", "path", "status"]
    )
    .expect("metrics 'kubedb_webhook_server_request_failure' to not be already registered")
});

#[cfg(feature = "metrics")]
static SERVER_REQUEST_DURATION: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubedb_webhook_server_request_duration",
            "duration of request handled by the server",
        ),
        &["method", "path", "status", "unit"]
    )
    .expect("metrics 'kubedb_webhook_server_request_duration' to not be already registered")
});

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(feature = "metrics")]
    #[error("{0}")]
    Metrics(metrics::Error),
    #[error("failed to read request body, {0}")]
    Body(Box<dyn StdError + Send + Sync>),
    #[error("failed to read request body, payload exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("failed to serialize payload, {0}")]
    Serialize(serde_json::Error),
}

// -----------------------------------------------------------------------------
// Helpers

#[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
pub async fn router(
    catalog: Arc<dyn Catalog>,
    req: Request<Body>,
) -> Result<Response<Body>, Error> {
    let begin = Instant::now();

    let method = req.method().to_owned();
    let path = req.uri().path().to_owned();
    let host = match req.uri().host() {
        Some(host) => host.to_string(),
        None => req
            .headers()
            .get("host")
            .map(|header| String::from_utf8_lossy(header.as_bytes()).to_string())
            .unwrap_or_else(|| String::from("<none>")),
    };

    // -------------------------------------------------------------------------
    // Basic routing
    let result = match (&method, path.as_str()) {
        (&Method::GET, "/healthz") => healthz(&req).await,
        #[cfg(feature = "metrics")]
        (&Method::GET, "/metrics") => metrics::handler(&req).await.map_err(Error::Metrics),
        (&Method::POST, path) => match path.parse::<Route>() {
            Ok(route) => admission(catalog.as_ref(), route, req).await,
            Err(_) => not_found(&req).await,
        },
        _ => not_found(&req).await,
    };

    let duration = Instant::now().duration_since(begin).as_micros();

    // -------------------------------------------------------------------------
    // Recover error
    let (res, success) = match result {
        Ok(res) => (res, true),
        Err(err) => (failure(&err)?, false),
    };

    info!(
        method = method.as_str(),
        host = host,
        path = path.as_str(),
        status = res.status().as_u16(),
        duration = duration,
        "Receive request"
    );

    #[cfg(feature = "metrics")]
    {
        let status = res.status().as_u16().to_string();
        let counter = if success {
            &SERVER_REQUEST_SUCCESS
        } else {
            &SERVER_REQUEST_FAILURE
        };

        counter
            .with_label_values(&[method.as_str(), path.as_str(), &status])
            .inc();

        SERVER_REQUEST_DURATION
            .with_label_values(&[method.as_str(), path.as_str(), &status, "us"])
            .inc_by(duration as f64);
    }

    #[cfg(not(feature = "metrics"))]
    let _ = success;

    Ok(res)
}

/// formats the error as a json object
fn failure(err: &Error) -> Result<Response<Body>, Error> {
    let mut map = BTreeMap::new();
    map.insert("error".to_string(), err.to_string());

    let mut res = Response::default();
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    *res.status_mut() = match err {
        Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    *res.body_mut() = Body::from(serde_json::to_string_pretty(&map).map_err(Error::Serialize)?);

    Ok(res)
}

#[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
pub async fn admission(
    catalog: &dyn Catalog,
    route: Route,
    req: Request<Body>,
) -> Result<Response<Body>, Error> {
    let body = hyper::body::to_bytes(Limited::new(req.into_body(), MAX_BODY_SIZE))
        .await
        .map_err(|err| match err.downcast_ref::<LengthLimitError>() {
            Some(_) => Error::PayloadTooLarge(MAX_BODY_SIZE),
            None => Error::Body(err),
        })?;

    let review = webhook::review(route, catalog, &body).await;

    let mut res = Response::default();
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    *res.status_mut() = StatusCode::OK;
    *res.body_mut() = Body::from(serde_json::to_vec(&review).map_err(Error::Serialize)?);

    Ok(res)
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn healthz(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::OK;
    *res.body_mut() = Body::from("ok");

    Ok(res)
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn not_found(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::NOT_FOUND;

    Ok(res)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::svc::{catalog::StaticCatalog, crd::Kind};

    fn catalog() -> Arc<dyn Catalog> {
        Arc::new(StaticCatalog::default().with(Kind::RabbitMq, "3.12.12", Some(999)))
    }

    fn request(method: Method, path: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .header("host", "kubedb-webhook.kubedb.svc")
            .body(body)
            .expect("request to be built")
    }

    async fn body(res: Response<Body>) -> Value {
        let bytes = hyper::body::to_bytes(res.into_body())
            .await
            .expect("body to be read");

        serde_json::from_slice(&bytes).expect("body to be json")
    }

    #[tokio::test]
    async fn health_check_answers_ok() {
        let res = router(catalog(), request(Method::GET, "/healthz", Body::empty()))
            .await
            .expect("request to be handled");

        assert_eq!(StatusCode::OK, res.status());
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        for (method, path) in [
            (Method::GET, "/unknown"),
            (Method::POST, "/mutate-kubedb-com-v1alpha2-postgres"),
            (Method::GET, "/mutate-kubedb-com-v1alpha2-kafka"),
        ] {
            let res = router(catalog(), request(method, path, Body::empty()))
                .await
                .expect("request to be handled");

            assert_eq!(StatusCode::NOT_FOUND, res.status(), "{}", path);
        }
    }

    #[tokio::test]
    async fn oversized_reviews_are_refused() {
        let res = router(
            catalog(),
            request(
                Method::POST,
                "/validate-kubedb-com-v1alpha2-rabbitmq",
                Body::from(vec![b' '; MAX_BODY_SIZE + 1]),
            ),
        )
        .await
        .expect("request to be handled");

        assert_eq!(StatusCode::PAYLOAD_TOO_LARGE, res.status());

        let body = body(res).await;
        assert!(body["error"]
            .as_str()
            .expect("error to be a string")
            .contains("payload exceeds"));
    }

    #[tokio::test]
    async fn admission_review_is_answered() {
        let review = json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "0df28fbd-5f5f-11e8-bc74-36e6bb280816",
                "kind": {"group": "kubedb.com", "version": "v1alpha2", "kind": "RabbitMQ"},
                "resource": {"group": "kubedb.com", "version": "v1alpha2", "resource": "rabbitmqs"},
                "name": "rm",
                "namespace": "demo",
                "operation": "CREATE",
                "userInfo": {"username": "admin"},
                "object": {
                    "apiVersion": "kubedb.com/v1alpha2",
                    "kind": "RabbitMQ",
                    "metadata": {"name": "rm", "namespace": "demo"},
                    "spec": {"version": "3.12.12", "replicas": 3, "storageType": "Durable"}
                },
                "dryRun": false
            }
        });

        let res = router(
            catalog(),
            request(
                Method::POST,
                "/validate-kubedb-com-v1alpha2-rabbitmq",
                Body::from(review.to_string()),
            ),
        )
        .await
        .expect("request to be handled");

        assert_eq!(StatusCode::OK, res.status());

        let body = body(res).await;
        assert_eq!("AdmissionReview", body["kind"]);
        assert_eq!("0df28fbd-5f5f-11e8-bc74-36e6bb280816", body["response"]["uid"]);
        assert_eq!(true, body["response"]["allowed"]);
    }
}
