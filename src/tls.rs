//! TLS plumbing for the listener and the upstream connections.
//!
//! The client-facing listener terminates TLS with a PEM cert/key pair
//! when configured. Upstream connections use a trust-all verifier:
//! the proxy sits inside the migration path and upstream certificate
//! configuration is an extension point, not a shipped feature.

use std::io::{BufReader, Seek};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{
    self,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    DigitallySignedStruct, SignatureScheme,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{ProxyError, Result};

/// Object-safe alias over the stream types a connection may sit on.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A boxed plain-TCP or TLS stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Build a TLS acceptor from PEM cert and key files.
pub fn build_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_file = std::fs::File::open(cert_path)
        .map_err(|e| ProxyError::Tls(format!("open cert failed: {e}")))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| ProxyError::Tls(format!("read certs failed: {e}")))?;

    let key_file = std::fs::File::open(key_path)
        .map_err(|e| ProxyError::Tls(format!("open key failed: {e}")))?;
    let mut key_reader = BufReader::new(key_file);
    let mut keys: Vec<PrivateKeyDer<'static>> = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
        .map(|k| k.map(Into::into))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| ProxyError::Tls(format!("read private key failed: {e}")))?;
    if keys.is_empty() {
        key_reader
            .rewind()
            .map_err(|e| ProxyError::Tls(format!("rewind key reader failed: {e}")))?;
        keys = rustls_pemfile::rsa_private_keys(&mut key_reader)
            .map(|k| k.map(Into::into))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ProxyError::Tls(format!("read rsa key failed: {e}")))?;
    }
    let key = keys
        .pop()
        .ok_or_else(|| ProxyError::Tls("no private key found".into()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ProxyError::Tls(format!("tls config failed: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build a connector that accepts any upstream certificate.
pub fn trust_all_connector() -> TlsConnector {
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(TrustAll))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Open an upstream connection, TLS-wrapped when requested.
pub async fn connect_upstream(host: &str, port: u16, tls: bool) -> Result<BoxedStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    tcp.set_nodelay(true)?;

    if !tls {
        return Ok(Box::new(tcp));
    }

    let server_name = server_name_for(host)?;
    let stream = trust_all_connector()
        .connect(server_name, tcp)
        .await
        .map_err(|e| ProxyError::Tls(format!("tls connect failed: {e}")))?;
    Ok(Box::new(stream))
}

fn server_name_for(host: &str) -> Result<ServerName<'static>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ServerName::from(ip));
    }
    ServerName::try_from(host.to_string())
        .map_err(|e| ProxyError::Tls(format!("invalid server name '{host}': {e}")))
}

/// Verifier that accepts every certificate.
#[derive(Debug)]
struct TrustAll;

impl ServerCertVerifier for TrustAll {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_for_ip() {
        let name = server_name_for("127.0.0.1").unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));
    }

    #[test]
    fn test_server_name_for_hostname() {
        let name = server_name_for("cassandra.example.com").unwrap();
        assert!(matches!(name, ServerName::DnsName(_)));
    }

    #[test]
    fn test_build_acceptor_missing_files() {
        let result = build_acceptor(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"));
        assert!(matches!(result, Err(ProxyError::Tls(_))));
    }

    #[tokio::test]
    async fn test_connect_upstream_refused() {
        // Port 1 on localhost is essentially never listening.
        let result = connect_upstream("127.0.0.1", 1, false).await;
        assert!(result.is_err());
    }
}
