//! # Metrics module
//!
//! This module expose the metrics gathered by the server in the prometheus
//! text format

use hyper::{
    header::{self, HeaderValue, InvalidHeaderValue},
    Body, Request, Response, StatusCode,
};
use prometheus::{gather, Encoder, TextEncoder};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize metrics, {0}")]
    Serialize(prometheus::Error),
    #[error("failed to parse header value given by prometheus, {0}")]
    InvalidHeader(InvalidHeaderValue),
}

// -----------------------------------------------------------------------------
// Helpers

/// returns in the [`Response`] object the encoded metrics gathered from the
/// application
#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn handler(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let families = gather();
    let encoder = TextEncoder::new();
    let mut buf = vec![];
    encoder
        .encode(&families, &mut buf)
        .map_err(Error::Serialize)?;

    let mut res = Response::default();
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(encoder.format_type()).map_err(Error::InvalidHeader)?,
    );

    *res.status_mut() = StatusCode::OK;
    *res.body_mut() = Body::from(buf);

    Ok(res)
}
