//! Taxpayer identity as resolved by the calling service

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;

/// Default document model when a request does not name one
pub const DEFAULT_MODEL: &str = "NFE";

/// A taxpayer registered to transmit documents
///
/// The fiscal ID (CNPJ or CPF) is the cache key for credentials and channels.
/// The bundle passphrase is kept as a [`SecretString`] and is redacted from
/// `Debug` output.
#[derive(Debug, Clone)]
pub struct TaxpayerIdentity {
    fiscal_id: String,
    bundle_path: PathBuf,
    passphrase: Arc<SecretString>,
    region: String,
    model: String,
}

impl TaxpayerIdentity {
    /// Create an identity for the given bundle and home region
    pub fn new(
        fiscal_id: impl Into<String>,
        bundle_path: impl Into<PathBuf>,
        passphrase: SecretString,
        region: impl Into<String>,
    ) -> Self {
        Self {
            fiscal_id: fiscal_id.into(),
            bundle_path: bundle_path.into(),
            passphrase: Arc::new(passphrase),
            region: region.into().to_ascii_uppercase(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Override the default document model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into().to_ascii_uppercase();
        self
    }

    /// Re-registration with a new bundle; cached credentials and channels for
    /// this fiscal ID must be evicted by the caller
    #[must_use]
    pub fn with_bundle(mut self, bundle_path: impl Into<PathBuf>, passphrase: SecretString) -> Self {
        self.bundle_path = bundle_path.into();
        self.passphrase = Arc::new(passphrase);
        self
    }

    /// Fiscal ID (CNPJ/CPF digits)
    #[must_use]
    pub fn fiscal_id(&self) -> &str {
        &self.fiscal_id
    }

    /// Path to the PKCS#12 bundle
    #[must_use]
    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    /// Bundle passphrase
    #[must_use]
    pub fn passphrase(&self) -> Arc<SecretString> {
        Arc::clone(&self.passphrase)
    }

    /// Home region (state abbreviation, upper case)
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Default document model (upper case)
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}
