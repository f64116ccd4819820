//! Server certificate verification for secure channels
//!
//! Chains are validated by webpki against the merged roots. Some SEFAZ hosts
//! present only a leaf issued by a CA they never send; such a host is trusted
//! when its leaf is byte-for-byte one of the harvested certificates and names
//! the host. Handshake signatures are always checked.

use std::collections::HashSet;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_name, VerifierBuilderError, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};

/// webpki validation with a fallback to harvested leaf certificates
#[derive(Debug)]
pub struct PinnedLeafVerifier {
    webpki: Arc<WebPkiServerVerifier>,
    pinned: Arc<HashSet<Vec<u8>>>,
}

impl PinnedLeafVerifier {
    /// Verifier over `roots`, accepting the DER leaves in `pinned` by exact match
    ///
    /// # Errors
    ///
    /// Returns an error if `roots` is empty or the provider has no usable
    /// signature algorithms.
    pub fn new(
        roots: Arc<RootCertStore>,
        pinned: Arc<HashSet<Vec<u8>>>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, VerifierBuilderError> {
        let webpki = WebPkiServerVerifier::builder_with_provider(roots, provider).build()?;
        Ok(Self { webpki, pinned })
    }

    fn accept_pinned(
        &self,
        end_entity: &CertificateDer<'_>,
        server_name: &ServerName<'_>,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let parsed = ParsedCertificate::try_from(end_entity)?;
        verify_server_name(&parsed, server_name)?;
        tracing::debug!(server = ?server_name, "server trusted through harvested leaf");
        Ok(ServerCertVerified::assertion())
    }
}

impl ServerCertVerifier for PinnedLeafVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .webpki
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
                if self.pinned.contains(end_entity.as_ref()) =>
            {
                self.accept_pinned(end_entity, server_name)
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}
