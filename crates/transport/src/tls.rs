//! TLS wrapping for `wss://` endpoints

use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::error::TransportError;

/// Wrap an established TCP stream in TLS
///
/// Trust roots are the bundled webpki set plus any PEM files the caller
/// supplies (for DevTools endpoints behind a self-signed proxy).
pub async fn wrap_tls(
    stream: TcpStream,
    host: &str,
    extra_roots: &[PathBuf],
) -> Result<TlsStream<TcpStream>, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    for path in extra_roots {
        let pem = std::fs::read(path).map_err(|e| {
            TransportError::TlsError(format!("cannot read root cert {}: {}", path.display(), e))
        })?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| {
                TransportError::TlsError(format!("bad PEM in {}: {}", path.display(), e))
            })?;
            roots.add(cert).map_err(|e| {
                TransportError::TlsError(format!("rejected root in {}: {}", path.display(), e))
            })?;
        }
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::TlsError(format!("invalid server name '{}': {}", host, e)))?;

    let connector = TlsConnector::from(Arc::new(config));
    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| TransportError::TlsError(e.to_string()))?;

    debug!("TLS established with {}", host);
    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_server_name_is_tls_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();

        let result = wrap_tls(stream, "not a hostname", &[]).await;
        assert!(matches!(result, Err(TransportError::TlsError(_))));
    }

    #[tokio::test]
    async fn test_missing_root_file_is_tls_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();

        let missing = PathBuf::from("/nonexistent/roots.pem");
        let result = wrap_tls(stream, "localhost", &[missing]).await;
        assert!(matches!(result, Err(TransportError::TlsError(_))));
    }
}
