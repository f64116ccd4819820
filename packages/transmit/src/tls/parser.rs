//! X.509 summary extraction shared by trust anchors and credential holders

use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

/// The certificate facts this crate records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    /// Subject DN in RFC 4514 form
    pub subject: String,
    /// Issuer DN in RFC 4514 form
    pub issuer: String,
    /// First subject common name, if any
    pub common_name: Option<String>,
    /// Serial number, lower-case hex
    pub serial: String,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
    /// Basic constraints CA flag
    pub is_ca: bool,
    /// DER of the SubjectPublicKeyInfo
    pub public_key_der: Vec<u8>,
}

/// Parse a DER certificate
///
/// # Errors
///
/// Returns a description of the parse failure if `der` is not a single
/// well-formed X.509 certificate.
pub fn summarize(der: &[u8]) -> Result<CertificateSummary, String> {
    let (rest, cert) =
        parse_x509_certificate(der).map_err(|e| format!("invalid X.509 certificate: {e}"))?;
    if !rest.is_empty() {
        return Err(format!("{} trailing bytes after certificate", rest.len()));
    }

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(ToString::to_string);
    let is_ca = cert
        .basic_constraints()
        .ok()
        .flatten()
        .is_some_and(|bc| bc.value.ca);

    Ok(CertificateSummary {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        common_name,
        serial: hex::encode(cert.raw_serial()),
        not_before: to_utc(cert.validity().not_before),
        not_after: to_utc(cert.validity().not_after),
        is_ca,
        public_key_der: cert.public_key().raw.to_vec(),
    })
}

fn to_utc(time: ASN1Time) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(time.timestamp(), 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
