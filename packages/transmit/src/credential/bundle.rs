//! PKCS#12 key bundle decoding

use fiscal_xmldsig::SigningCredential;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use zeroize::Zeroizing;

use super::holder::CertificateHolder;
use crate::error::CredentialError;
use crate::tls::parser::{summarize, CertificateSummary};

/// Decrypted key material of one taxpayer
///
/// Held only in memory; the PKCS#8 key bytes are wiped on drop.
pub struct CredentialHandle {
    fiscal_id: String,
    private_key: Zeroizing<Vec<u8>>,
    rsa_key: Option<RsaPrivateKey>,
    chain: Vec<CertificateDer<'static>>,
    holder: CertificateHolder,
}

impl CredentialHandle {
    /// Fiscal ID this credential was loaded for
    #[must_use]
    pub fn fiscal_id(&self) -> &str {
        &self.fiscal_id
    }

    /// Leaf certificate
    #[must_use]
    pub fn leaf_certificate(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    /// Certificate chain, leaf first
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Private key for TLS client authentication
    #[must_use]
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.private_key.to_vec()))
    }

    /// Whether the key can produce XML signatures
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        self.rsa_key.is_some()
    }

    /// Holder details from the leaf certificate
    #[must_use]
    pub fn holder(&self) -> &CertificateHolder {
        &self.holder
    }
}

impl SigningCredential for CredentialHandle {
    fn signing_key(&self) -> Option<&RsaPrivateKey> {
        self.rsa_key.as_ref()
    }

    fn leaf_certificate_der(&self) -> &[u8] {
        self.leaf_certificate().as_ref()
    }
}

impl std::fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("fiscal_id", &self.fiscal_id)
            .field("subject", &self.holder.subject)
            .field("chain_len", &self.chain.len())
            .field("rsa", &self.rsa_key.is_some())
            .finish_non_exhaustive()
    }
}

/// Decrypt a PKCS#12 bundle into a credential
///
/// CPU bound; callers run it on the blocking pool.
///
/// # Errors
///
/// Returns an error if:
/// - the bundle is not PKCS#12
/// - the passphrase fails the integrity check
/// - there is not exactly one private key entry
/// - no certificate carries the key's public key
pub fn decode_bundle(
    bytes: &[u8],
    passphrase: &str,
    fiscal_id: &str,
) -> Result<CredentialHandle, CredentialError> {
    let pfx = p12::PFX::parse(bytes)
        .map_err(|e| CredentialError::MalformedBundle(format!("not a PKCS#12 bundle: {e:?}")))?;

    if !pfx.verify_mac(passphrase) {
        return Err(CredentialError::WrongPassphrase(fiscal_id.to_string()));
    }

    let mut keys = pfx
        .key_bags(passphrase)
        .map_err(|e| CredentialError::MalformedBundle(format!("unreadable key entries: {e:?}")))?;
    let private_key = match keys.len() {
        0 => return Err(CredentialError::NoKeyEntry),
        1 => Zeroizing::new(keys.remove(0)),
        n => {
            keys.iter_mut().for_each(|k| zeroize::Zeroize::zeroize(k));
            return Err(CredentialError::AmbiguousKeyEntries(n));
        }
    };

    let certificates = pfx
        .cert_x509_bags(passphrase)
        .map_err(|e| CredentialError::MalformedBundle(format!("unreadable certificates: {e:?}")))?;
    let mut parsed = Vec::with_capacity(certificates.len());
    for der in certificates {
        let summary = summarize(&der).map_err(CredentialError::MalformedBundle)?;
        parsed.push((der, summary));
    }

    let rsa_key = RsaPrivateKey::from_pkcs8_der(&private_key).ok();
    let leaf_index = match &rsa_key {
        Some(key) => {
            let public = key.to_public_key();
            parsed.iter().position(|(_, summary)| {
                RsaPublicKey::from_public_key_der(&summary.public_key_der)
                    .is_ok_and(|candidate| candidate == public)
            })
        }
        // Without a parsed key, the only end-entity certificate is the leaf
        None => {
            let mut end_entities = parsed
                .iter()
                .enumerate()
                .filter(|(_, (_, summary))| !summary.is_ca);
            match (end_entities.next(), end_entities.next()) {
                (Some((index, _)), None) => Some(index),
                _ => None,
            }
        }
    }
    .ok_or(CredentialError::NoMatchingCertificate)?;

    let (chain, holder) = order_chain(parsed, leaf_index);
    if rsa_key.is_none() {
        tracing::warn!(fiscal_id, "bundle key is not RSA; documents cannot be signed with it");
    }

    Ok(CredentialHandle {
        fiscal_id: fiscal_id.to_string(),
        private_key,
        rsa_key,
        chain,
        holder,
    })
}

/// Leaf first, then each issuer found in the bundle
fn order_chain(
    mut parsed: Vec<(Vec<u8>, CertificateSummary)>,
    leaf_index: usize,
) -> (Vec<CertificateDer<'static>>, CertificateHolder) {
    let (leaf_der, leaf) = parsed.swap_remove(leaf_index);
    let holder = CertificateHolder::from_summary(&leaf);

    let mut chain = vec![CertificateDer::from(leaf_der)];
    let mut current = leaf;
    while current.issuer != current.subject {
        let Some(position) = parsed.iter().position(|(_, s)| s.subject == current.issuer) else {
            break;
        };
        let (der, summary) = parsed.swap_remove(position);
        chain.push(CertificateDer::from(der));
        current = summary;
    }
    (chain, holder)
}
