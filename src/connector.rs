//! Upstream connector (component B): DNS resolve, TCP connect, optional TLS
//! client handshake with SNI, under a dedicated connect timeout.

use crate::error::ProxyError;
use crate::origin::Origin;
use rustls::pki_types::ServerName;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A rustls `ServerCertVerifier` that accepts any certificate without
/// validation. Used when `acceptAnyCert` is set — common for internal
/// traffic where encryption is desired but upstream identity verification
/// is not.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Object-safe union of everything a bridge needs from its socket: plain TCP
/// or TLS-wrapped TCP, behind a single boxed trait so the rest of the engine
/// doesn't need to be generic over the transport.
pub trait UpstreamTransport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> UpstreamTransport for T {}

pub type BoxedTransport = Box<dyn UpstreamTransport>;

fn verifying_tls_config() -> Arc<rustls::ClientConfig> {
    static CONFIG: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let root_store = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                rustls::ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth(),
            )
        })
        .clone()
}

fn accept_any_tls_config() -> Arc<rustls::ClientConfig> {
    static CONFIG: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            Arc::new(
                rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth(),
            )
        })
        .clone()
}

/// Connect to `origin`, optionally TLS-wrapping with SNI `sni_host` (falling
/// back to the origin's own host). Applies `connect_timeout` to DNS+TCP and
/// again to the TLS handshake.
pub async fn connect(
    origin: &Origin,
    sni_host: Option<&str>,
    accept_any_cert: bool,
    connect_timeout: std::time::Duration,
) -> Result<BoxedTransport, ProxyError> {
    let addr = format!("{}:{}", origin.host(), origin.port());

    let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| ProxyError::UpstreamConnectTimeout)?
        .map_err(|_| ProxyError::UpstreamConnectTimeout)?;
    tcp.set_nodelay(true).ok();

    if !origin.is_tls() {
        return Ok(Box::new(tcp));
    }

    let tls_config = if accept_any_cert {
        accept_any_tls_config()
    } else {
        verifying_tls_config()
    };

    let host = sni_host.unwrap_or_else(|| origin.host());
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ProxyError::UpstreamTlsFailure(e.to_string()))?;

    let connector = tokio_rustls::TlsConnector::from(tls_config);
    let tls_stream = tokio::time::timeout(connect_timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| ProxyError::UpstreamConnectTimeout)?
        .map_err(|e| ProxyError::UpstreamTlsFailure(e.to_string()))?;

    Ok(Box::new(tls_stream))
}
