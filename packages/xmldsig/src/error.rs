//! Signing error types

use thiserror::Error;

/// Errors raised while canonicalizing, signing or verifying a document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// The input is not a well-formed XML document
    #[error("Malformed XML: {0}")]
    Malformed(String),

    /// The credential cannot produce an RSA-SHA1 signature
    #[error("Unusable signing key: {0}")]
    UnusableKey(String),

    /// The root element already carries an enveloped signature
    #[error("Document is already signed")]
    AlreadySigned,

    /// No enveloped signature was found under the root element
    #[error("Document carries no enveloped signature")]
    SignatureMissing,

    /// The signature does not match the document or the embedded certificate
    #[error("Signature invalid: {0}")]
    InvalidSignature(String),

    /// RSA or certificate operation failed
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

impl From<quick_xml::Error> for SigningError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SigningError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        Self::Malformed(format!("invalid attribute: {e}"))
    }
}

impl From<quick_xml::escape::EscapeError> for SigningError {
    fn from(e: quick_xml::escape::EscapeError) -> Self {
        Self::Malformed(format!("invalid reference: {e}"))
    }
}

impl From<std::str::Utf8Error> for SigningError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::Malformed(format!("invalid UTF-8: {e}"))
    }
}
