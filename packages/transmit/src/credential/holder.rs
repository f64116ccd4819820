//! Certificate holder details
//!
//! ICP-Brasil e-CNPJ and e-CPF certificates carry the holder's legal name and
//! fiscal ID in the common name as `NAME:DIGITS`.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::CredentialError;
use crate::tls::parser::{summarize, CertificateSummary};

/// Who a taxpayer certificate was issued to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateHolder {
    /// Legal name from the common name
    pub legal_name: String,
    /// CNPJ (14 digits) or CPF (11 digits) from the common name
    pub fiscal_id: Option<String>,
    /// Subject DN
    pub subject: String,
    /// Issuer DN
    pub issuer: String,
    /// Serial number, hex
    pub serial: String,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
}

impl CertificateHolder {
    /// Read holder details from a DER certificate
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::MalformedBundle`] if the certificate does not parse.
    pub fn from_der(der: &[u8]) -> Result<Self, CredentialError> {
        let summary = summarize(der).map_err(CredentialError::MalformedBundle)?;
        Ok(Self::from_summary(&summary))
    }

    pub(crate) fn from_summary(summary: &CertificateSummary) -> Self {
        let (legal_name, fiscal_id) = match &summary.common_name {
            Some(cn) => split_common_name(cn),
            None => (summary.subject.clone(), None),
        };
        Self {
            legal_name,
            fiscal_id,
            subject: summary.subject.clone(),
            issuer: summary.issuer.clone(),
            serial: summary.serial.clone(),
            not_before: summary.not_before,
            not_after: summary.not_after,
        }
    }

    /// Whether `at` falls inside the validity period
    #[must_use]
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Whether the certificate expires within `window` from now
    #[must_use]
    pub fn expires_within(&self, window: TimeDelta) -> bool {
        self.not_after - Utc::now() <= window
    }
}

fn split_common_name(cn: &str) -> (String, Option<String>) {
    if let Some((name, digits)) = cn.rsplit_once(':') {
        let digits = digits.trim();
        if matches!(digits.len(), 11 | 14) && digits.bytes().all(|b| b.is_ascii_digit()) {
            return (name.trim().to_string(), Some(digits.to_string()));
        }
    }
    (cn.trim().to_string(), None)
}
