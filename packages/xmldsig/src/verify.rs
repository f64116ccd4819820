//! Verification of enveloped signatures produced by [`crate::DocumentSigner`]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha1::{Digest, Sha1};
use x509_parser::prelude::*;

use crate::c14n::{self, element_scope, Namespaces};
use crate::document;
use crate::error::SigningError;

/// Facts established by a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    /// DER of the certificate carried in `KeyInfo`
    pub certificate_der: Vec<u8>,
    /// Subject DN of that certificate
    pub subject: String,
}

#[derive(Default)]
struct SignatureParts {
    signed_info: Option<std::ops::Range<usize>>,
    reference_uri: Option<String>,
    digest_value: String,
    signature_value: String,
    certificate: String,
    scope: Namespaces,
}

/// Verify the enveloped signature that closes the root element
///
/// # Errors
///
/// Returns an error if:
/// - the document is malformed or its root's last child is not a signature
/// - the reference is not the whole document
/// - the digest does not match the document
/// - the RSA-SHA1 signature does not verify under the embedded certificate
pub fn verify_enveloped(xml: &str) -> Result<VerifiedSignature, SigningError> {
    let layout = document::inspect(xml)?;
    let span = layout.trailing_signature().ok_or(SigningError::SignatureMissing)?;
    let signature_xml = &xml[span.clone()];
    let parts = read_signature(signature_xml, &layout.namespaces)?;

    if parts.reference_uri.as_deref() != Some("") {
        return Err(SigningError::InvalidSignature(
            "reference does not cover the whole document".to_string(),
        ));
    }

    let unsigned = format!("{}{}", &xml[..span.start], &xml[span.end..]);
    let digest = Sha1::digest(c14n::canonicalize(&unsigned)?.as_bytes());
    if digest.as_slice() != decode(&parts.digest_value)?.as_slice() {
        return Err(SigningError::InvalidSignature("digest mismatch".to_string()));
    }

    let signed_info_span = parts
        .signed_info
        .clone()
        .ok_or_else(|| SigningError::InvalidSignature("missing SignedInfo".to_string()))?;
    let canonical_signed_info =
        c14n::canonicalize_with_context(&signature_xml[signed_info_span], &parts.scope)?;

    let certificate_der = decode(&parts.certificate)?;
    let (_, certificate) = parse_x509_certificate(&certificate_der)
        .map_err(|e| SigningError::Crypto(format!("embedded certificate is invalid: {e}")))?;
    let public_key = RsaPublicKey::from_public_key_der(certificate.public_key().raw)
        .map_err(|e| SigningError::Crypto(format!("certificate key is not RSA: {e}")))?;
    let signature = Signature::try_from(decode(&parts.signature_value)?.as_slice())
        .map_err(|e| SigningError::InvalidSignature(format!("bad signature encoding: {e}")))?;

    VerifyingKey::<Sha1>::new(public_key)
        .verify(canonical_signed_info.as_bytes(), &signature)
        .map_err(|_| SigningError::InvalidSignature("RSA-SHA1 verification failed".to_string()))?;

    Ok(VerifiedSignature {
        subject: certificate.subject().to_string(),
        certificate_der,
    })
}

fn read_signature(fragment: &str, root_scope: &Namespaces) -> Result<SignatureParts, SigningError> {
    let mut reader = Reader::from_str(fragment);
    let mut parts = SignatureParts::default();
    let mut path: Vec<String> = Vec::new();
    let mut signed_info_start = None;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event()?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                let local = local_name(e.name().into_inner())?;
                if path.is_empty() {
                    parts.scope = element_scope(&e, root_scope)?;
                }
                if local == "SignedInfo" && path.len() == 1 {
                    signed_info_start = Some(start);
                }
                if local == "Reference" {
                    for attr in e.attributes() {
                        let attr = attr?;
                        if attr.key.as_ref() == b"URI" {
                            parts.reference_uri = Some(attr.unescape_value()?.into_owned());
                        }
                    }
                }
                path.push(local);
            }
            Event::End(_) => {
                if let Some(local) = path.pop() {
                    if local == "SignedInfo" && path.len() == 1 {
                        parts.signed_info = signed_info_start.map(|s| s..end);
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                match path.last().map(String::as_str) {
                    Some("DigestValue") => parts.digest_value.push_str(&text),
                    Some("SignatureValue") => parts.signature_value.push_str(&text),
                    Some("X509Certificate") if parts.certificate.is_empty() => {
                        parts.certificate.push_str(&text);
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(parts)
}

fn local_name(qname: &[u8]) -> Result<String, SigningError> {
    let name = std::str::from_utf8(qname)?;
    Ok(name.rsplit(':').next().unwrap_or(name).to_string())
}

fn decode(value: &str) -> Result<Vec<u8>, SigningError> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| SigningError::InvalidSignature(format!("invalid base64 content: {e}")))
}
