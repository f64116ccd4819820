#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

//! Enveloped XML digital signatures for fiscal documents
//!
//! Produces and checks the XML-DSig profile required by the Brazilian tax
//! authorities: the whole document is referenced, canonicalized with inclusive
//! C14N 1.0, digested with SHA-1 and signed with RSA-SHA1. The signature is
//! appended as the last child of the root element.

mod c14n;
mod document;
pub mod error;
mod signer;
mod verify;

pub use c14n::{canonicalize, canonicalize_with_context, Namespaces, XML_NAMESPACE};
pub use error::SigningError;
pub use signer::{DocumentSigner, SignedDocument, SigningCredential};
pub use verify::{verify_enveloped, VerifiedSignature};

/// XML-DSig namespace
pub const XMLDSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";
/// Inclusive C14N 1.0 without comments
pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
/// Enveloped-signature transform
pub const ENVELOPED_SIGNATURE_TRANSFORM: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
/// RSA PKCS#1 v1.5 with SHA-1
pub const RSA_SHA1_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
/// SHA-1 digest
pub const SHA1_DIGEST_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
