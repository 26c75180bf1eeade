//! # Server module
//!
//! This module provide the admission server, it listens either in plain text
//! or behind the transport layer security when a certificate is configured.

use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use hyper::{
    server::conn::Http,
    service::{make_service_fn, service_fn},
    Body, Request,
};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::svc::{
    catalog::Catalog,
    cfg::{Server, Tls},
    http::{router, tls},
};

// -----------------------------------------------------------------------------
// Constants

/// pause after a failed accept, it avoids spinning while the process is out of
/// file descriptors
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to bind on socket '{0}', {1}")]
    Bind(SocketAddr, std::io::Error),
    #[error("failed to bind on socket '{0}', {1}")]
    BindHyper(SocketAddr, hyper::Error),
    #[error("failed to serve on socket '{0}', {1}")]
    Serve(SocketAddr, hyper::Error),
    #[error("failed to load transport layer security, {0}")]
    Tls(tls::Error),
}

// -----------------------------------------------------------------------------
// Helpers

#[cfg_attr(feature = "trace", tracing::instrument(skip(catalog)))]
pub async fn serve(config: &Server, catalog: Arc<dyn Catalog>) -> Result<(), Error> {
    match &config.tls {
        Some(tls) => secure(config.listen, tls, catalog).await,
        None => plain(config.listen, catalog).await,
    }
}

async fn plain(addr: SocketAddr, catalog: Arc<dyn Catalog>) -> Result<(), Error> {
    let service = make_service_fn(move |_| {
        let catalog = catalog.to_owned();

        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                router(catalog.to_owned(), req)
            }))
        }
    });

    let builder = hyper::Server::try_bind(&addr).map_err(|err| Error::BindHyper(addr, err))?;

    info!(addr = addr.to_string(), "Begin to listen on address");
    builder
        .serve(service)
        .await
        .map_err(|err| Error::Serve(addr, err))
}

async fn secure(addr: SocketAddr, tls: &Tls, catalog: Arc<dyn Catalog>) -> Result<(), Error> {
    let acceptor = TlsAcceptor::from(tls::server_config(tls).map_err(Error::Tls)?);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|err| Error::Bind(addr, err))?;

    info!(
        addr = addr.to_string(),
        certificate = tls.certificate.display().to_string(),
        "Begin to listen on address with transport layer security"
    );

    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(conn) => conn,
            Err(err) => {
                debug!(error = err.to_string(), "Could not accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let acceptor = acceptor.to_owned();
        let catalog = catalog.to_owned();

        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(
                        remote = remote.to_string(),
                        error = err.to_string(),
                        "Could not complete tls handshake"
                    );
                    return;
                }
            };

            let service = service_fn(move |req: Request<Body>| router(catalog.to_owned(), req));
            if let Err(err) = Http::new().serve_connection(stream, service).await {
                debug!(
                    remote = remote.to_string(),
                    error = err.to_string(),
                    "Could not serve connection"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::svc::catalog::StaticCatalog;

    fn catalog() -> Arc<dyn Catalog> {
        Arc::new(StaticCatalog::default())
    }

    #[tokio::test]
    async fn busy_addresses_are_reported() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener to be bound");
        let addr = listener.local_addr().expect("listener to have an address");

        let config = Server { listen: addr, tls: None };
        assert!(matches!(
            serve(&config, catalog()).await,
            Err(Error::BindHyper(a, _)) if a == addr
        ));
    }

    #[tokio::test]
    async fn missing_certificates_are_reported_before_listening() {
        let config = Server {
            listen: "127.0.0.1:0".parse().expect("address to be parsed"),
            tls: Some(Tls {
                certificate: PathBuf::from("/nonexistent/tls.crt"),
                key: PathBuf::from("/nonexistent/tls.key"),
            }),
        };

        assert!(matches!(serve(&config, catalog()).await, Err(Error::Tls(_))));
    }

    #[test]
    fn accept_backoff_is_short() {
        assert!(ACCEPT_BACKOFF > Duration::ZERO);
        assert!(ACCEPT_BACKOFF <= Duration::from_secs(1));
    }
}
