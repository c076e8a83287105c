//! # Blocking Dial
//!
//! [`blocking_dial`] connects to a `host:port` target and resolves only once the
//! channel is actually usable, or fails with the underlying cause.
//!
//! When TLS is configured the helper owns the handshake itself (TCP connect, then a
//! `tokio-rustls` handshake inside a custom connector), so certificate and handshake
//! failures surface verbatim through the error's source chain instead of hiding
//! behind a generic readiness timeout. The returned future is cancel-safe; deadlines
//! are the caller's concern.

use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tonic::transport::{Channel, Endpoint, Uri};

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("invalid address '{address}': {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("invalid TLS server name '{0}'")]
    InvalidServerName(String),

    #[error("failed to connect to '{address}': {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },
}

/// Dials the given `host:port` address, optionally with TLS, and blocks until the
/// connection is ready.
pub async fn blocking_dial(address: &str, tls: Option<ClientConfig>) -> Result<Channel, DialError> {
    let Some(mut config) = tls else {
        let endpoint = endpoint_for(address, "http")?;
        return endpoint
            .connect()
            .await
            .map_err(|source| DialError::ConnectionFailed {
                address: address.to_string(),
                source,
            });
    };

    // gRPC requires HTTP/2, and since the handshake is ours, so is the ALPN.
    config.alpn_protocols = vec![b"h2".to_vec()];
    let connector = TlsConnector::from(Arc::new(config));

    let host = address
        .rsplit_once(':')
        .map(|(host, _port)| host)
        .unwrap_or(address)
        .to_string();
    let server_name = ServerName::try_from(host.clone())
        .map_err(|_| DialError::InvalidServerName(host.clone()))?;

    let endpoint = endpoint_for(address, "https")?;
    let target = address.to_string();
    endpoint
        .connect_with_connector(tower::service_fn(move |_: Uri| {
            let connector = connector.clone();
            let server_name = server_name.clone();
            let target = target.clone();
            async move {
                let tcp = TcpStream::connect(target.as_str()).await?;
                // The handshake runs here, so its errors come back as-is.
                let tls = connector.connect(server_name, tcp).await?;
                Ok::<_, std::io::Error>(TokioIo::new(tls))
            }
        }))
        .await
        .map_err(|source| DialError::ConnectionFailed {
            address: address.to_string(),
            source,
        })
}

fn endpoint_for(address: &str, scheme: &str) -> Result<Endpoint, DialError> {
    Endpoint::from_shared(format!("{scheme}://{address}")).map_err(|source| {
        DialError::InvalidAddress {
            address: address.to_string(),
            source,
        }
    })
}
