//! Enveloped RSA-SHA1 signing
//!
//! The signature profile matches what the SEFAZ web services accept:
//! whole-document reference (`URI=""`), enveloped-signature + inclusive C14N
//! transforms, SHA-1 digest, RSA PKCS#1 v1.5 with SHA-1, and the signer's leaf
//! certificate in `KeyInfo/X509Data`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha1::{Digest, Sha1};

use crate::c14n::{self, Namespaces};
use crate::document::{self, RootClose};
use crate::error::SigningError;
use crate::{
    C14N_ALGORITHM, ENVELOPED_SIGNATURE_TRANSFORM, RSA_SHA1_ALGORITHM, SHA1_DIGEST_ALGORITHM,
    XMLDSIG_NAMESPACE,
};

/// Key material a document can be signed with
pub trait SigningCredential {
    /// RSA private key, `None` when the credential holds another key type
    fn signing_key(&self) -> Option<&RsaPrivateKey>;

    /// DER encoding of the certificate embedded in `KeyInfo`
    fn leaf_certificate_der(&self) -> &[u8];
}

/// A document with an enveloped signature as the last child of its root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    xml: String,
    digest_value: String,
}

impl SignedDocument {
    /// Signed XML text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.xml
    }

    /// Base64 SHA-1 digest of the canonical unsigned document
    #[must_use]
    pub fn digest_value(&self) -> &str {
        &self.digest_value
    }

    /// Consume into the signed XML text
    #[must_use]
    pub fn into_string(self) -> String {
        self.xml
    }
}

impl AsRef<str> for SignedDocument {
    fn as_ref(&self) -> &str {
        &self.xml
    }
}

/// Stateless enveloped-signature producer
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentSigner;

impl DocumentSigner {
    /// Create a signer
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Sign the whole document and append the `Signature` to its root
    ///
    /// Only the signature is inserted; every other byte of `xml` is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the credential has no RSA private key
    /// - `xml` is not a well-formed document
    /// - the root element already carries a signature
    pub fn sign<C>(&self, xml: &str, credential: &C) -> Result<SignedDocument, SigningError>
    where
        C: SigningCredential + ?Sized,
    {
        let key = credential.signing_key().ok_or_else(|| {
            SigningError::UnusableKey("credential does not hold an RSA private key".to_string())
        })?;

        let canonical = c14n::canonicalize(xml)?;
        let layout = document::inspect(xml)?;
        if !layout.signatures.is_empty() {
            return Err(SigningError::AlreadySigned);
        }

        let digest_value = STANDARD.encode(Sha1::digest(canonical.as_bytes()));
        let signed_info = signed_info(&digest_value);

        let mut context: Namespaces = layout.namespaces.clone();
        context.insert(String::new(), XMLDSIG_NAMESPACE.to_string());
        let canonical_signed_info = c14n::canonicalize_with_context(&signed_info, &context)?;

        let signing_key = SigningKey::<Sha1>::new(key.clone());
        let signature = signing_key
            .try_sign(canonical_signed_info.as_bytes())
            .map_err(|e| SigningError::Crypto(format!("RSA-SHA1 signing failed: {e}")))?;

        let signature_element = format!(
            "<Signature xmlns=\"{XMLDSIG_NAMESPACE}\">{signed_info}\
             <SignatureValue>{}</SignatureValue>\
             <KeyInfo><X509Data><X509Certificate>{}</X509Certificate></X509Data></KeyInfo>\
             </Signature>",
            STANDARD.encode(signature.to_bytes()),
            STANDARD.encode(credential.leaf_certificate_der()),
        );

        let xml = splice(xml, &layout.name, &layout.close, &signature_element);
        tracing::debug!(root = %layout.name, digest = %digest_value, "document signed");

        Ok(SignedDocument { xml, digest_value })
    }
}

fn signed_info(digest_value: &str) -> String {
    format!(
        "<SignedInfo>\
         <CanonicalizationMethod Algorithm=\"{C14N_ALGORITHM}\"></CanonicalizationMethod>\
         <SignatureMethod Algorithm=\"{RSA_SHA1_ALGORITHM}\"></SignatureMethod>\
         <Reference URI=\"\">\
         <Transforms>\
         <Transform Algorithm=\"{ENVELOPED_SIGNATURE_TRANSFORM}\"></Transform>\
         <Transform Algorithm=\"{C14N_ALGORITHM}\"></Transform>\
         </Transforms>\
         <DigestMethod Algorithm=\"{SHA1_DIGEST_ALGORITHM}\"></DigestMethod>\
         <DigestValue>{digest_value}</DigestValue>\
         </Reference>\
         </SignedInfo>"
    )
}

fn splice(xml: &str, root_name: &str, close: &RootClose, signature: &str) -> String {
    let mut out = String::with_capacity(xml.len() + signature.len() + root_name.len() + 3);
    match close {
        RootClose::EndTag(at) => {
            out.push_str(&xml[..*at]);
            out.push_str(signature);
            out.push_str(&xml[*at..]);
        }
        RootClose::SelfClosing(tag) => {
            let open = xml[tag.clone()].trim_end_matches('>').trim_end_matches('/');
            out.push_str(&xml[..tag.start]);
            out.push_str(open);
            out.push('>');
            out.push_str(signature);
            out.push_str("</");
            out.push_str(root_name);
            out.push('>');
            out.push_str(&xml[tag.end..]);
        }
    }
    out
}
