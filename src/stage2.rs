//! Stage 2 — Port Probe (§4.5). Applies only to TCP-native schemes.
//!
//! Step 1 is a bare TCP connect. Step 2, gated on "TLS-likely" URIs, layers
//! a `rustls` handshake with certificate and hostname verification
//! disabled — we only care whether *some* TLS server answers, not whether
//! its certificate is trustworthy. `rustls`/`tokio-rustls` are already part
//! of the dependency stack for the same reason the `shoes` crate carries
//! them: `shoes/src/network/tcp/tcp_client_handler_factory.rs` builds its
//! own `rustls::ClientConfig` and constructs `ServerName::try_from(...)`
//! the same way `server_name_for` does here.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::config::AppConfig;
use crate::model::ParsedProxy;
use crate::net_util::resolve_ordered;

#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

fn insecure_tls_connector() -> TlsConnector {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Given a parsed TCP-native proxy, return reachability within
/// `CONNECT_TIMEOUT_MS` / `PROBE_TIMEOUT_MS`.
pub async fn probe(parsed: &ParsedProxy, cfg: &AppConfig) -> bool {
    let Some(port) = parsed.port else { return false };
    let connect_timeout = Duration::from_millis(cfg.connect_timeout_ms);

    let addrs = resolve_ordered(&parsed.host, port).await;
    let Some(stream) = connect_first(&addrs, connect_timeout).await else {
        return false;
    };

    if !cfg.enable_stage2 || !parsed.tls_hint {
        return true;
    }

    let probe_timeout = Duration::from_millis(cfg.probe_timeout_ms);
    tokio::time::timeout(probe_timeout, tls_handshake(stream, &parsed.host))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

async fn connect_first(
    addrs: &[std::net::SocketAddr],
    timeout: Duration,
) -> Option<tokio::net::TcpStream> {
    for addr in addrs {
        if let Ok(Ok(stream)) = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await {
            return Some(stream);
        }
    }
    None
}

async fn tls_handshake(stream: tokio::net::TcpStream, host: &str) -> std::io::Result<()> {
    let connector = insecure_tls_connector();
    let server_name = server_name_for(host)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    connector.connect(server_name, stream).await?;
    Ok(())
}

fn server_name_for(host: &str) -> Result<ServerName<'static>, rustls::pki_types::InvalidDnsNameError> {
    ServerName::try_from(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_accepts_domain_and_ip() {
        assert!(server_name_for("example.com").is_ok());
        assert!(server_name_for("198.51.100.9").is_ok());
    }
}
