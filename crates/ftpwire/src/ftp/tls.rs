//! TLS helpers for explicit FTPS (RFC 4217).
//!
//! - Builds one rustls `ClientConfig` per session from `FtpTlsConfig`;
//!   the same connector wraps the control channel and every protected
//!   data channel, so the data handshakes can resume the control session.
//! - `upgrade_to_tls` wraps a plain codec after `AUTH TLS` / 234.
//! - `downgrade` unwinds TLS after `CCC`.

use crate::ftp::connection::with_timeout;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::protocol::{ControlStream, FtpCodec};
use crate::ftp::types::{FtpTlsConfig, TlsVerifyMode};
use log::{debug, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Everything needed to start a TLS client handshake toward the server.
#[derive(Clone)]
pub struct TlsCapability {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl std::fmt::Debug for TlsCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCapability")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsCapability {
    /// Use a caller-built rustls configuration as-is.
    pub fn from_client_config(config: Arc<ClientConfig>, server_name: &str) -> FtpResult<Self> {
        Ok(Self {
            connector: TlsConnector::from(config),
            server_name: parse_server_name(server_name)?,
        })
    }

    /// Build the client configuration described by `tls`.
    pub async fn from_config(tls: &FtpTlsConfig, host: &str) -> FtpResult<Self> {
        let roots = load_roots(tls.ca_cert_path.as_deref()).await?;

        let builder = match tls.verify {
            TlsVerifyMode::Required => ClientConfig::builder().with_root_certificates(roots),
            TlsVerifyMode::None => {
                warn!("TLS certificate verification disabled – insecure!");
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoCertVerifier))
            }
            TlsVerifyMode::Optional => {
                let verifier: Arc<dyn ServerCertVerifier> = if roots.is_empty() {
                    warn!("no trust anchors available, server certificate will not be checked");
                    Arc::new(NoCertVerifier)
                } else {
                    let inner = WebPkiServerVerifier::builder(Arc::new(roots))
                        .build()
                        .map_err(|e| FtpError::tls_failed(format!("certificate verifier: {}", e)))?;
                    Arc::new(WarnOnlyVerifier { inner })
                };
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(verifier)
            }
        };

        let config = match (&tls.client_cert_path, &tls.client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let chain = load_certs(cert_path).await?;
                let key = load_key(key_path).await?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| FtpError::tls_failed(format!("client certificate: {}", e)))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(FtpError::invalid_config(
                    "client certificate and key must be configured together",
                ))
            }
        };

        let name = tls.server_name.as_deref().unwrap_or(host);
        Self::from_client_config(Arc::new(config), name)
    }

    /// Run a client handshake over `tcp`.
    pub async fn handshake(&self, tcp: TcpStream, limit: Option<Duration>) -> FtpResult<TlsStream<TcpStream>> {
        with_timeout(
            limit,
            "TLS handshake",
            self.connector.connect(self.server_name.clone(), tcp),
        )
        .await
        .map_err(|e| match e.kind {
            FtpErrorKind::Timeout => e,
            _ => FtpError::tls_failed(format!("TLS handshake failed: {}", e.message)),
        })
    }
}

fn parse_server_name(name: &str) -> FtpResult<ServerName<'static>> {
    ServerName::try_from(name.to_string())
        .map_err(|e| FtpError::tls_failed(format!("Invalid server name '{}': {}", name, e)))
}

async fn read_pem(path: &str, what: &str) -> FtpResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| FtpError::tls_failed(format!("Failed to read {} '{}': {}", what, path, e)))
}

async fn load_roots(ca_path: Option<&str>) -> FtpResult<RootCertStore> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        debug!("native root store: {}", err);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!("loaded {} native roots ({} ignored)", added, ignored);

    if let Some(path) = ca_path {
        for cert in load_certs(path).await? {
            roots
                .add(cert)
                .map_err(|e| FtpError::tls_failed(format!("Failed to add CA cert: {}", e)))?;
        }
    }
    Ok(roots)
}

async fn load_certs(path: &str) -> FtpResult<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path, "certificate").await?;
    let certs = rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| FtpError::tls_failed(format!("Bad PEM in '{}': {}", path, e)))?;
    if certs.is_empty() {
        return Err(FtpError::tls_failed(format!("no certificates in '{}'", path)));
    }
    Ok(certs)
}

async fn load_key(path: &str) -> FtpResult<PrivateKeyDer<'static>> {
    let pem = read_pem(path, "private key").await?;
    rustls_pemfile::private_key(&mut Cursor::new(pem))
        .map_err(|e| FtpError::tls_failed(format!("Bad PEM in '{}': {}", path, e)))?
        .ok_or_else(|| FtpError::tls_failed(format!("no private key in '{}'", path)))
}

/// Wrap a plain control codec in TLS. Called after `AUTH TLS` got 234.
pub async fn upgrade_to_tls(codec: FtpCodec, tls: &TlsCapability) -> FtpResult<FtpCodec> {
    let mut codec = codec;
    codec.drain_pending_lf().await?;
    let (stream, opts) = codec.into_parts();
    let tcp = match stream {
        ControlStream::Plain(reader) if !reader.buffer().is_empty() => {
            return Err(FtpError::protocol_error(
                "server sent data after accepting AUTH TLS",
            ))
        }
        ControlStream::Plain(reader) => reader.into_inner(),
        ControlStream::Tls(_) => {
            return Err(FtpError::illegal_state("control connection is already TLS"))
        }
    };
    let stream = tls.handshake(tcp, opts.timeout()).await?;
    debug!("control channel TLS established");
    Ok(FtpCodec::from_parts(ControlStream::Tls(BufReader::new(stream)), opts))
}

/// Shut TLS down on the control channel and continue in clear (after `CCC`).
///
/// Sends close_notify and waits for the server's before handing back the
/// raw socket.
pub async fn downgrade(codec: FtpCodec) -> FtpResult<FtpCodec> {
    let (stream, opts) = codec.into_parts();
    let limit = opts.timeout();
    let mut tls = match stream {
        ControlStream::Tls(reader) if !reader.buffer().is_empty() => {
            return Err(FtpError::protocol_error("server sent data after accepting CCC"))
        }
        ControlStream::Tls(reader) => reader.into_inner(),
        ControlStream::Plain(_) => {
            return Err(FtpError::illegal_state("control connection is not TLS"))
        }
    };

    tls.get_mut().1.send_close_notify();
    with_timeout(limit, "TLS close_notify", tls.flush()).await?;

    let mut scratch = [0u8; 512];
    loop {
        let n = with_timeout(limit, "TLS shutdown", tls.read(&mut scratch)).await?;
        if n == 0 {
            break;
        }
        debug!("discarding {} bytes received during TLS shutdown", n);
    }

    let (tcp, _) = tls.into_inner();
    debug!("control channel back to clear text");
    Ok(FtpCodec::from_parts(ControlStream::Plain(BufReader::new(tcp)), opts))
}

// ─── Verifiers ───────────────────────────────────────────────────────

/// Accepts any server certificate.
#[derive(Debug)]
struct NoCertVerifier;

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
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
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

/// Runs WebPKI verification but only logs a failed chain.
#[derive(Debug)]
struct WarnOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for WarnOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Err(e) = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp, now)
        {
            warn!("server certificate not trusted ({}), continuing", e);
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insecure_capability_builds() {
        let tls = FtpTlsConfig {
            verify: TlsVerifyMode::None,
            ..Default::default()
        };
        let cap = TlsCapability::from_config(&tls, "ftp.example.com").await.unwrap();
        assert!(format!("{:?}", cap).contains("ftp.example.com"));
    }

    #[tokio::test]
    async fn server_name_override_is_used() {
        let tls = FtpTlsConfig {
            verify: TlsVerifyMode::None,
            server_name: Some("files.example.org".into()),
            ..Default::default()
        };
        let cap = TlsCapability::from_config(&tls, "10.0.0.5").await.unwrap();
        assert!(format!("{:?}", cap).contains("files.example.org"));
    }

    #[tokio::test]
    async fn half_configured_client_auth_is_rejected() {
        let tls = FtpTlsConfig {
            verify: TlsVerifyMode::None,
            client_cert_path: Some("/nonexistent/cert.pem".into()),
            ..Default::default()
        };
        let err = TlsCapability::from_config(&tls, "h").await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::InvalidConfig);
    }

    #[tokio::test]
    async fn missing_ca_file_is_tls_error() {
        let tls = FtpTlsConfig {
            ca_cert_path: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        let err = TlsCapability::from_config(&tls, "h").await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::TlsFailed);
    }

    #[tokio::test]
    async fn ca_file_without_certs_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        std::fs::write(&path, "not a pem file\n").unwrap();
        let tls = FtpTlsConfig {
            ca_cert_path: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let err = TlsCapability::from_config(&tls, "h").await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::TlsFailed);
    }
}
