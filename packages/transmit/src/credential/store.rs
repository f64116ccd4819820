//! Per-taxpayer credential cache

use std::sync::Arc;

use chrono::TimeDelta;
use secrecy::ExposeSecret;

use super::bundle::{decode_bundle, CredentialHandle};
use crate::cache::SingleFlightCache;
use crate::error::CredentialError;
use crate::identity::TaxpayerIdentity;

/// Warn when a loaded certificate expires within this window
const EXPIRY_WARNING_DAYS: i64 = 30;

/// Counters of a [`CredentialStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CredentialStats {
    /// Loads answered from the cache or an in-flight load
    pub hits: usize,
    /// Bundle reads and decryptions performed
    pub decryptions: usize,
    /// Credentials currently cached
    pub cached: usize,
}

/// Loads key bundles once per fiscal ID and shares the result
#[derive(Debug)]
pub struct CredentialStore {
    cache: SingleFlightCache<CredentialHandle, CredentialError>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: SingleFlightCache::new("credentials"),
        }
    }

    /// Credential of `identity`, reading and decrypting its bundle on first use
    ///
    /// Concurrent first loads for one fiscal ID perform a single decryption.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the bundle file cannot be read
    /// - the passphrase is wrong
    /// - the bundle is malformed or has zero or several key entries
    /// - no certificate matches the key
    pub async fn load(
        &self,
        identity: &TaxpayerIdentity,
    ) -> Result<Arc<CredentialHandle>, CredentialError> {
        let fiscal_id = identity.fiscal_id().to_string();
        let path = identity.bundle_path().to_path_buf();
        let passphrase = identity.passphrase();

        self.cache
            .get_or_load(identity.fiscal_id(), move || async move {
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    CredentialError::BundleUnreadable {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    }
                })?;

                let id = fiscal_id.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    decode_bundle(&bytes, passphrase.expose_secret(), &id)
                })
                .await
                .map_err(|e| CredentialError::Internal(format!("bundle decryption task failed: {e}")))??;

                let holder = handle.holder();
                if holder.fiscal_id.as_deref().is_some_and(|id| id != fiscal_id) {
                    tracing::warn!(
                        %fiscal_id,
                        certificate_fiscal_id = ?holder.fiscal_id,
                        "certificate was issued to a different fiscal ID"
                    );
                }
                if holder.expires_within(TimeDelta::days(EXPIRY_WARNING_DAYS)) {
                    tracing::warn!(%fiscal_id, not_after = %holder.not_after, "taxpayer certificate expires soon");
                }
                tracing::info!(%fiscal_id, subject = %holder.subject, "credential loaded");
                Ok(handle)
            })
            .await
    }

    /// Drop the cached credential, e.g. after the bundle was replaced
    pub fn evict(&self, fiscal_id: &str) -> bool {
        self.cache.evict(fiscal_id)
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CredentialStats {
        let stats = self.cache.stats();
        CredentialStats {
            hits: stats.hits,
            decryptions: stats.loads,
            cached: stats.entries,
        }
    }
}
