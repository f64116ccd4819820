//! Server certificate harvesting
//!
//! Several SEFAZ endpoints present chains that do not lead to any public root,
//! so their certificates are captured once and pinned as trust anchors. The
//! capture handshake uses [`CaptureOnlyVerifier`], which accepts any chain
//! while still checking that the server holds the key of the certificate it
//! presents. That verifier is a reduced-trust policy: it is private to this
//! module, used for nothing but reading the chain, and no application data is
//! ever sent over a harvesting connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::TrustStoreError;
use crate::routing::HostPort;

/// Records whatever chain the server presents and accepts it; handshake
/// signatures are still verified
///
/// One verifier serves one harvest, so the captured chain belongs to that host.
#[derive(Debug)]
struct CaptureOnlyVerifier {
    provider: Arc<CryptoProvider>,
    captured: Mutex<Option<Vec<CertificateDer<'static>>>>,
    key_proven: AtomicBool,
}

impl CaptureOnlyVerifier {
    fn new(provider: Arc<CryptoProvider>) -> Self {
        Self {
            provider,
            captured: Mutex::new(None),
            key_proven: AtomicBool::new(false),
        }
    }

    /// The captured chain, once the server has also proven its key
    fn take(&self) -> Option<Vec<CertificateDer<'static>>> {
        if !self.key_proven.load(Ordering::Acquire) {
            return None;
        }
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl ServerCertVerifier for CaptureOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        tracing::debug!(
            server = ?server_name,
            leaf_len = end_entity.len(),
            intermediates = intermediates.len(),
            "capturing presented chain without validation"
        );
        let chain = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|c| c.clone().into_owned())
            .collect();
        *self
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(chain);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        let valid = rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )?;
        self.key_proven.store(true, Ordering::Release);
        Ok(valid)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        let valid = rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )?;
        self.key_proven.store(true, Ordering::Release);
        Ok(valid)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Opens capture-only TLS connections and returns the presented chains
#[derive(Clone)]
pub struct HostHarvester {
    provider: Arc<CryptoProvider>,
    timeout: Duration,
}

impl HostHarvester {
    /// Create a harvester whose handshakes are bounded by `timeout`
    ///
    /// # Errors
    ///
    /// Returns an error if the provider supports none of the safe protocol
    /// versions.
    pub fn new(timeout: Duration) -> Result<Self, TrustStoreError> {
        let provider = super::crypto_provider();
        // Fail at construction rather than on the first host
        ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TrustStoreError::Internal(format!("TLS versions unsupported: {e}")))?;
        Ok(Self { provider, timeout })
    }

    /// Handshake with `target` and return its chain, leaf first
    ///
    /// The chain is kept once the server has presented it and signed the
    /// handshake, even if the handshake then fails, as it does against hosts
    /// that demand a client certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the connection or handshake does not finish within the timeout
    /// - the TCP connection is refused
    /// - the TLS handshake fails before the server presents a certificate and
    ///   proves it holds the key
    /// - the server presents no certificate
    pub async fn harvest(
        &self,
        target: &HostPort,
    ) -> Result<Vec<CertificateDer<'static>>, TrustStoreError> {
        tokio::time::timeout(self.timeout, self.handshake(target))
            .await
            .map_err(|_| TrustStoreError::HarvestTimeout {
                host: target.to_string(),
                seconds: self.timeout.as_secs(),
            })?
    }

    async fn handshake(
        &self,
        target: &HostPort,
    ) -> Result<Vec<CertificateDer<'static>>, TrustStoreError> {
        let server_name = ServerName::try_from(target.host.clone()).map_err(|e| {
            TrustStoreError::Network(format!("invalid host name '{}': {e}", target.host))
        })?;

        let verifier = Arc::new(CaptureOnlyVerifier::new(Arc::clone(&self.provider)));
        let config = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TrustStoreError::Internal(format!("TLS versions unsupported: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::clone(&verifier) as Arc<dyn ServerCertVerifier>)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let tcp = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| TrustStoreError::Network(format!("failed to connect to {target}: {e}")))?;

        let handshake = connector.connect(server_name, tcp).await;
        let chain = match (verifier.take(), handshake) {
            (Some(chain), Ok(_)) => chain,
            (Some(chain), Err(e)) => {
                tracing::debug!(%target, error = %e, "handshake ended after the chain was presented");
                chain
            }
            (None, Ok(_)) => Vec::new(),
            (None, Err(e)) => {
                return Err(TrustStoreError::Network(format!(
                    "TLS handshake with {target} failed: {e}"
                )))
            }
        };

        if chain.is_empty() {
            return Err(TrustStoreError::Network(format!(
                "{target} presented no certificate"
            )));
        }

        tracing::debug!(%target, certificates = chain.len(), "chain harvested");
        Ok(chain)
    }
}

impl std::fmt::Debug for HostHarvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHarvester")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
