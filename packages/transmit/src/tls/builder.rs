//! Build-once custom trust store
//!
//! The custom store combines the ICP-Brasil roots with certificates harvested
//! from every HTTPS endpoint of the routing table. It is built the first time
//! it is needed and persisted; later runs load the persisted copy.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use super::anchors::{AnchorSource, TrustAnchor, TrustAnchorSet};
use super::harvest::HostHarvester;
use super::http_client::TrustHttpClient;
use crate::config::TransmitConfig;
use crate::error::TrustStoreError;
use crate::routing::HostPort;

/// Name of the persisted custom set
pub const CUSTOM_SET_NAME: &str = "sefaz-custom";

/// Builds and persists the custom trust store
pub struct TrustStoreBuilder {
    path: PathBuf,
    root_urls: Vec<String>,
    root_alias_prefix: String,
    hosts: Vec<HostPort>,
    refresh_on_new_hosts: bool,
    http: TrustHttpClient,
    harvester: HostHarvester,
    build_lock: Mutex<()>,
}

impl TrustStoreBuilder {
    /// Create a builder for the configured roots and the given endpoints
    ///
    /// # Errors
    ///
    /// Returns an error if the download client or harvester cannot be created.
    pub fn new(config: &TransmitConfig, hosts: Vec<HostPort>) -> Result<Self, TrustStoreError> {
        Ok(Self {
            path: config.trust_store_path.clone(),
            root_urls: config.root_certificate_urls.clone(),
            root_alias_prefix: config.root_alias_prefix.clone(),
            hosts,
            refresh_on_new_hosts: config.refresh_on_new_hosts,
            http: TrustHttpClient::new(config.harvest_timeout, &config.user_agent)?,
            harvester: HostHarvester::new(config.harvest_timeout)?,
            build_lock: Mutex::new(()),
        })
    }

    /// Where the custom store is persisted
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted store, building and persisting it first if absent
    ///
    /// Idempotent: once a store exists it is returned as is, unless
    /// `refresh_on_new_hosts` is enabled and the routing table names hosts the
    /// store has not harvested yet, in which case only those are harvested.
    /// Unreachable roots and hosts are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the persisted store exists but cannot be read or decoded
    /// - the store cannot be written
    pub async fn ensure_custom_trust_store(&self) -> Result<TrustAnchorSet, TrustStoreError> {
        let _guard = self.build_lock.lock().await;

        if let Some(mut existing) = TrustAnchorSet::load(&self.path).await? {
            tracing::debug!(path = %self.path.display(), anchors = existing.len(), "custom trust store loaded");
            if !self.refresh_on_new_hosts {
                return Ok(existing);
            }
            let new_hosts: Vec<HostPort> = self
                .hosts
                .iter()
                .filter(|h| !existing.has_host(&h.to_string()))
                .cloned()
                .collect();
            if new_hosts.is_empty() {
                return Ok(existing);
            }
            tracing::info!(hosts = new_hosts.len(), "harvesting hosts added since the last build");
            self.harvest_hosts(&mut existing, &new_hosts).await;
            existing.persist(&self.path).await?;
            return Ok(existing);
        }

        tracing::info!(
            path = %self.path.display(),
            roots = self.root_urls.len(),
            hosts = self.hosts.len(),
            "building custom trust store"
        );
        let mut set = TrustAnchorSet::new(CUSTOM_SET_NAME);
        self.add_roots(&mut set).await;
        self.harvest_hosts(&mut set, &self.hosts).await;
        set.persist(&self.path).await?;
        Ok(set)
    }

    async fn add_roots(&self, set: &mut TrustAnchorSet) {
        for url in &self.root_urls {
            let alias = root_alias(&self.root_alias_prefix, url);
            let anchor = match self.http.get_root_certificate(url).await {
                Ok(der) => TrustAnchor::from_der(
                    alias.as_str(),
                    &der,
                    AnchorSource::Root { url: url.clone() },
                ),
                Err(e) => Err(e),
            };
            match anchor {
                Ok(anchor) => {
                    if set.insert(anchor) {
                        tracing::info!(%alias, %url, "root certificate added");
                    }
                }
                Err(e) => tracing::warn!(%url, error = %e, "skipping root certificate"),
            }
        }
    }

    async fn harvest_hosts(&self, set: &mut TrustAnchorSet, hosts: &[HostPort]) {
        for target in hosts {
            match self.harvester.harvest(target).await {
                Ok(chain) => {
                    let mut added = 0usize;
                    for (index, der) in chain.iter().enumerate() {
                        let source = AnchorSource::Harvested {
                            host: target.host.clone(),
                            port: target.port,
                        };
                        let alias = harvest_alias(target, index);
                        match TrustAnchor::from_der(alias, der, source) {
                            Ok(anchor) => {
                                if set.insert(anchor) {
                                    added += 1;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(%target, index, error = %e, "skipping unparsable certificate");
                            }
                        }
                    }
                    set.record_host(target.to_string());
                    tracing::info!(%target, presented = chain.len(), added, "host certificates harvested");
                }
                Err(e) => tracing::warn!(%target, error = %e, "skipping host"),
            }
        }
    }
}

impl std::fmt::Debug for TrustStoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStoreBuilder")
            .field("path", &self.path)
            .field("root_urls", &self.root_urls)
            .field("hosts", &self.hosts)
            .field("refresh_on_new_hosts", &self.refresh_on_new_hosts)
            .finish_non_exhaustive()
    }
}

/// `{host}-{index}`, with the port inserted when it is not 443
fn harvest_alias(target: &HostPort, index: usize) -> String {
    if target.port == 443 {
        format!("{}-{index}", target.host)
    } else {
        format!("{}-{}-{index}", target.host, target.port)
    }
}

/// `{prefix}-{lower-cased file stem}` of a root certificate URL
fn root_alias(prefix: &str, url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let stem = match file.rfind('.') {
        Some(dot) if dot > 0 => &file[..dot],
        _ => file,
    };
    format!("{prefix}-{}", stem.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_alias_uses_lowercased_file_stem() {
        assert_eq!(
            root_alias(
                "icp-brasil",
                "http://acraiz.icpbrasil.gov.br/credenciadas/RAIZ/ICP-Brasilv10.crt"
            ),
            "icp-brasil-icp-brasilv10"
        );
        assert_eq!(root_alias("x", "http://h/Root.CER?v=2"), "x-root");
        assert_eq!(root_alias("x", "http://h/raiz"), "x-raiz");
    }

    #[test]
    fn harvest_alias_includes_non_default_port() {
        assert_eq!(
            harvest_alias(&HostPort::new("nfe.fazenda.sp.gov.br", 443), 0),
            "nfe.fazenda.sp.gov.br-0"
        );
        assert_eq!(harvest_alias(&HostPort::new("127.0.0.1", 8443), 1), "127.0.0.1-8443-1");
    }
}
