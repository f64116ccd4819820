//! Trust anchor sets and their persisted form

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Serialize};

use super::parser::summarize;
use crate::error::TrustStoreError;

/// Where an anchor came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnchorSource {
    /// Root certificate downloaded from a URL
    Root { url: String },
    /// Certificate presented by a host during a TLS handshake
    Harvested { host: String, port: u16 },
    /// Platform default store
    Platform,
}

/// A certificate trusted as a root for server authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchor {
    /// Unique name within its set
    pub alias: String,
    /// Subject DN
    pub subject: String,
    /// Issuer DN
    pub issuer: String,
    /// Serial number, hex
    pub serial: String,
    /// End of validity
    pub not_after: DateTime<Utc>,
    /// Origin of the certificate
    pub source: AnchorSource,
    /// PEM encoding of the certificate
    pub certificate_pem: String,
}

impl TrustAnchor {
    /// Build an anchor from a DER certificate
    ///
    /// # Errors
    ///
    /// Returns an error if `der` is not a valid X.509 certificate.
    pub fn from_der(
        alias: impl Into<String>,
        der: &[u8],
        source: AnchorSource,
    ) -> Result<Self, TrustStoreError> {
        let summary = summarize(der).map_err(TrustStoreError::CertificateParsing)?;
        Ok(Self {
            alias: alias.into(),
            subject: summary.subject,
            issuer: summary.issuer,
            serial: summary.serial,
            not_after: summary.not_after,
            source,
            certificate_pem: pem::encode(&pem::Pem::new("CERTIFICATE", der.to_vec())),
        })
    }

    /// DER encoding of the certificate
    ///
    /// # Errors
    ///
    /// Returns an error if the stored PEM is not a certificate.
    pub fn certificate_der(&self) -> Result<CertificateDer<'static>, TrustStoreError> {
        let parsed = pem::parse(&self.certificate_pem).map_err(|e| {
            TrustStoreError::CertificateParsing(format!("anchor '{}': {e}", self.alias))
        })?;
        if parsed.tag() != "CERTIFICATE" {
            return Err(TrustStoreError::CertificateParsing(format!(
                "anchor '{}' holds a {} block",
                self.alias,
                parsed.tag()
            )));
        }
        Ok(CertificateDer::from(parsed.into_contents()))
    }

    /// Whether the certificate has expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.not_after < Utc::now()
    }

    fn identity(&self) -> (&str, &str) {
        (&self.subject, &self.issuer)
    }
}

/// Named, ordered collection of anchors without duplicate subject/issuer pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustAnchorSet {
    name: String,
    created_at: DateTime<Utc>,
    anchors: Vec<TrustAnchor>,
    harvested_hosts: BTreeSet<String>,
}

impl TrustAnchorSet {
    /// Create an empty set
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            anchors: Vec::new(),
            harvested_hosts: BTreeSet::new(),
        }
    }

    /// Add an anchor unless its subject/issuer pair or alias is present
    ///
    /// Returns whether the anchor was added.
    pub fn insert(&mut self, anchor: TrustAnchor) -> bool {
        let duplicate = self
            .anchors
            .iter()
            .any(|a| a.identity() == anchor.identity() || a.alias == anchor.alias);
        if duplicate {
            tracing::debug!(alias = %anchor.alias, subject = %anchor.subject, "skipping duplicate anchor");
            return false;
        }
        self.anchors.push(anchor);
        true
    }

    /// Record that `host` (as `host:port`) has been harvested
    pub fn record_host(&mut self, host: impl Into<String>) {
        self.harvested_hosts.insert(host.into());
    }

    /// Whether `host` (as `host:port`) has been harvested
    #[must_use]
    pub fn has_host(&self, host: &str) -> bool {
        self.harvested_hosts.contains(host)
    }

    /// Hosts harvested into this set
    pub fn harvested_hosts(&self) -> impl Iterator<Item = &str> {
        self.harvested_hosts.iter().map(String::as_str)
    }

    /// Set name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation time
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Anchors in insertion order
    #[must_use]
    pub fn anchors(&self) -> &[TrustAnchor] {
        &self.anchors
    }

    /// Anchor by alias
    #[must_use]
    pub fn get(&self, alias: &str) -> Option<&TrustAnchor> {
        self.anchors.iter().find(|a| a.alias == alias)
    }

    /// Number of anchors
    #[must_use]
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Whether the set has no anchors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Load a persisted set; `Ok(None)` when the file does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub async fn load(path: &Path) -> Result<Option<Self>, TrustStoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TrustStoreError::FileOperation(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        let set = serde_json::from_slice(&bytes)
            .map_err(|e| TrustStoreError::Corrupt(format!("{}: {e}", path.display())))?;
        Ok(Some(set))
    }

    /// Persist atomically: write a sibling temporary file, then rename
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written or renamed.
    pub async fn persist(&self, path: &Path) -> Result<(), TrustStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TrustStoreError::FileOperation(format!(
                    "failed to create {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| TrustStoreError::Internal(format!("failed to encode trust store: {e}")))?;

        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = std::path::PathBuf::from(temp_name);

        tokio::fs::write(&temp_path, &json).await.map_err(|e| {
            TrustStoreError::FileOperation(format!("failed to write {}: {e}", temp_path.display()))
        })?;
        tokio::fs::rename(&temp_path, path).await.map_err(|e| {
            TrustStoreError::FileOperation(format!("failed to replace {}: {e}", path.display()))
        })?;

        tracing::info!(path = %path.display(), anchors = self.anchors.len(), "trust store persisted");
        Ok(())
    }
}
