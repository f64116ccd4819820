//! Active trust: the persisted custom store merged with platform roots
//!
//! The merged set is computed on first use and published through an
//! `ArcSwapOption`, so readers never take a lock. Population and refresh are
//! serialized by an async mutex.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use rustls::RootCertStore;
use tokio::sync::Mutex;

use super::anchors::{AnchorSource, TrustAnchorSet};
use super::builder::TrustStoreBuilder;
use crate::config::PlatformRoots;
use crate::error::TrustStoreError;

/// Alias prefix of platform anchors in a merged set
pub const PLATFORM_ALIAS_PREFIX: &str = "platform";

/// Custom anchors plus platform anchors, ready for rustls
#[derive(Debug)]
pub struct MergedTrust {
    custom: TrustAnchorSet,
    platform_aliases: Vec<String>,
    roots: Arc<RootCertStore>,
    pinned: Arc<HashSet<Vec<u8>>>,
}

impl MergedTrust {
    /// Merge `custom` with the platform anchors already in `platform`
    ///
    /// Custom anchors come first. Platform anchors are aliased `platform-{n}`,
    /// skipping any alias the custom set already uses. Harvested certificates
    /// are also kept as pinned leaves for hosts whose issuer is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`TrustStoreError::NoUsableAnchors`] if the result is empty.
    pub fn merge(custom: TrustAnchorSet, platform: RootCertStore) -> Result<Self, TrustStoreError> {
        let mut roots = RootCertStore::empty();
        let mut pinned = HashSet::new();
        for anchor in custom.anchors() {
            if anchor.is_expired() {
                tracing::warn!(alias = %anchor.alias, not_after = %anchor.not_after, "custom trust anchor has expired");
            }
            match anchor.certificate_der() {
                Ok(der) => {
                    if matches!(anchor.source, AnchorSource::Harvested { .. }) {
                        pinned.insert(der.as_ref().to_vec());
                    }
                    if let Err(e) = roots.add(der) {
                        tracing::warn!(alias = %anchor.alias, error = %e, "custom anchor rejected by rustls");
                    }
                }
                Err(e) => tracing::warn!(alias = %anchor.alias, error = %e, "custom anchor unreadable"),
            }
        }

        let mut platform_aliases = Vec::with_capacity(platform.len());
        let mut n = 0usize;
        for _ in 0..platform.len() {
            let alias = loop {
                let candidate = format!("{PLATFORM_ALIAS_PREFIX}-{n}");
                n += 1;
                if custom.get(&candidate).is_none() {
                    break candidate;
                }
            };
            platform_aliases.push(alias);
        }
        roots.roots.extend(platform.roots);

        if roots.is_empty() {
            tracing::error!("merged trust set is empty");
            return Err(TrustStoreError::NoUsableAnchors);
        }

        tracing::info!(
            custom = custom.len(),
            platform = platform_aliases.len(),
            total = roots.len(),
            "active trust merged"
        );
        Ok(Self {
            custom,
            platform_aliases,
            roots: Arc::new(roots),
            pinned: Arc::new(pinned),
        })
    }

    /// rustls root store holding every anchor
    #[must_use]
    pub fn roots(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.roots)
    }

    /// DER encodings of harvested certificates, trusted by exact match
    #[must_use]
    pub fn pinned(&self) -> Arc<HashSet<Vec<u8>>> {
        Arc::clone(&self.pinned)
    }

    /// The persisted custom set this merge started from
    #[must_use]
    pub fn custom(&self) -> &TrustAnchorSet {
        &self.custom
    }

    /// Aliases of custom anchors followed by platform aliases
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.custom
            .anchors()
            .iter()
            .map(|a| a.alias.as_str())
            .chain(self.platform_aliases.iter().map(String::as_str))
    }

    /// Number of platform anchors
    #[must_use]
    pub fn platform_count(&self) -> usize {
        self.platform_aliases.len()
    }

    /// Total anchors accepted by rustls
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether no anchor is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Provides the active merged trust to channel construction
pub struct TrustManagerProvider {
    builder: Arc<TrustStoreBuilder>,
    platform: PlatformRoots,
    active: ArcSwapOption<MergedTrust>,
    populate: Mutex<()>,
}

impl TrustManagerProvider {
    /// Create a provider over the given custom store builder
    #[must_use]
    pub fn new(builder: Arc<TrustStoreBuilder>, platform: PlatformRoots) -> Self {
        Self {
            builder,
            platform,
            active: ArcSwapOption::empty(),
            populate: Mutex::new(()),
        }
    }

    /// The merged trust, computing it on first use
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the custom trust store cannot be loaded or built
    /// - the platform store is unavailable
    /// - the merged set is empty
    pub async fn active_trust(&self) -> Result<Arc<MergedTrust>, TrustStoreError> {
        if let Some(active) = self.active.load_full() {
            return Ok(active);
        }
        let _guard = self.populate.lock().await;
        if let Some(active) = self.active.load_full() {
            return Ok(active);
        }
        let merged = Arc::new(self.build().await?);
        self.active.store(Some(Arc::clone(&merged)));
        Ok(merged)
    }

    /// Rebuild the merged trust from the persisted custom store
    ///
    /// Channels built earlier keep the trust they were built with.
    ///
    /// # Errors
    ///
    /// Same conditions as [`TrustManagerProvider::active_trust`]; on error the
    /// previous merged trust stays active.
    pub async fn refresh(&self) -> Result<Arc<MergedTrust>, TrustStoreError> {
        let _guard = self.populate.lock().await;
        let merged = Arc::new(self.build().await?);
        self.active.store(Some(Arc::clone(&merged)));
        tracing::info!(anchors = merged.len(), "active trust refreshed");
        Ok(merged)
    }

    async fn build(&self) -> Result<MergedTrust, TrustStoreError> {
        let custom = self.builder.ensure_custom_trust_store().await?;
        let platform = self.platform;
        let platform_roots = tokio::task::spawn_blocking(move || platform_roots(platform))
            .await
            .map_err(|e| TrustStoreError::Internal(format!("platform store task failed: {e}")))??;
        MergedTrust::merge(custom, platform_roots)
    }
}

impl std::fmt::Debug for TrustManagerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustManagerProvider")
            .field("platform", &self.platform)
            .field("populated", &self.active.load().is_some())
            .finish_non_exhaustive()
    }
}

/// Load the platform default anchors
///
/// # Errors
///
/// Returns [`TrustStoreError::PlatformUnavailable`] when the native store
/// yields no certificate and reported load errors.
pub fn platform_roots(source: PlatformRoots) -> Result<RootCertStore, TrustStoreError> {
    let mut roots = RootCertStore::empty();
    match source {
        PlatformRoots::Webpki => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        PlatformRoots::Native => {
            let result = rustls_native_certs::load_native_certs();
            for err in &result.errors {
                tracing::warn!(error = %err, "platform certificate load error");
            }
            if result.certs.is_empty() && !result.errors.is_empty() {
                let reasons: Vec<String> = result.errors.iter().map(ToString::to_string).collect();
                tracing::error!("no platform certificate could be loaded");
                return Err(TrustStoreError::PlatformUnavailable(reasons.join("; ")));
            }
            let (added, ignored) = roots.add_parsable_certificates(result.certs);
            if ignored > 0 {
                tracing::warn!(ignored, "unparsable platform certificates ignored");
            }
            tracing::debug!(added, "platform certificates loaded");
        }
    }
    Ok(roots)
}
