//! Transmission configuration
//!
//! Provides the configuration structure, its presets and JSON loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// ICP-Brasil root certificates published by the national root authority
pub const ICP_BRASIL_ROOT_URLS: [&str; 3] = [
    "http://acraiz.icpbrasil.gov.br/credenciadas/RAIZ/ICP-Brasilv10.crt",
    "http://acraiz.icpbrasil.gov.br/credenciadas/RAIZ/ICP-Brasilv5.crt",
    "http://acraiz.icpbrasil.gov.br/credenciadas/RAIZ/ICP-Brasilv2.crt",
];

/// Which platform certificate store is merged with the custom trust store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformRoots {
    /// Operating system store via `rustls-native-certs`
    #[default]
    Native,
    /// Mozilla roots bundled through `webpki-roots`
    Webpki,
}

/// Configuration for trust building, channels and the routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitConfig {
    /// Where the custom trust store is persisted
    pub trust_store_path: PathBuf,
    /// Routing table overriding the built-in one
    pub routing_table_path: Option<PathBuf>,
    /// Root certificates downloaded into the custom trust store
    pub root_certificate_urls: Vec<String>,
    /// Alias prefix for downloaded roots
    pub root_alias_prefix: String,
    /// Platform store merged at runtime
    pub platform_roots: PlatformRoots,
    /// Bound on each root download and each host handshake
    #[serde(with = "seconds")]
    pub harvest_timeout: Duration,
    /// TCP + TLS connect timeout for secure channels
    #[serde(with = "seconds")]
    pub connect_timeout: Duration,
    /// Whole-request timeout for secure channels
    #[serde(with = "seconds")]
    pub send_timeout: Duration,
    /// Harvest hosts added to the routing table after the store was built
    pub refresh_on_new_hosts: bool,
    /// User-Agent sent on every request
    pub user_agent: String,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            trust_store_path: PathBuf::from("trust/sefaz-trust-store.json"),
            routing_table_path: None,
            root_certificate_urls: ICP_BRASIL_ROOT_URLS.iter().map(ToString::to_string).collect(),
            root_alias_prefix: "icp-brasil".to_string(),
            platform_roots: PlatformRoots::Native,
            harvest_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(30),
            refresh_on_new_hosts: false,
            user_agent: concat!("fiscal-transmit/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransmitConfig {
    /// Configuration for the production environment
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Configuration for the homologation (test) environment
    ///
    /// Homologation hosts change more often and answer slower, so the store
    /// picks up new hosts and requests get more time.
    #[must_use]
    pub fn homologation() -> Self {
        Self {
            trust_store_path: PathBuf::from("trust/sefaz-trust-store-homologacao.json"),
            refresh_on_new_hosts: true,
            harvest_timeout: Duration::from_secs(15),
            send_timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file; absent fields take defaults
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the file cannot be read
    /// - the content is not valid JSON for this structure
    /// - a value fails [`TransmitConfig::validate`]
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded transmit configuration");
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns an error if a timeout is zero or the root alias prefix is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("harvest_timeout", self.harvest_timeout),
            ("connect_timeout", self.connect_timeout),
            ("send_timeout", self.send_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be at least one second".to_string(),
                });
            }
        }
        if self.root_alias_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "root_alias_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: TransmitConfig =
            serde_json::from_str(r#"{"send_timeout": 45, "platform_roots": "webpki"}"#).unwrap();
        assert_eq!(config.send_timeout, Duration::from_secs(45));
        assert_eq!(config.platform_roots, PlatformRoots::Webpki);
        assert_eq!(config.root_alias_prefix, "icp-brasil");
        assert_eq!(config.root_certificate_urls.len(), 3);
        assert!(!config.refresh_on_new_hosts);
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(TransmitConfig::homologation()).unwrap();
        assert_eq!(json["send_timeout"], 60);
        assert_eq!(json["refresh_on_new_hosts"], true);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = TransmitConfig {
            connect_timeout: Duration::ZERO,
            ..TransmitConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "connect_timeout", .. })
        ));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transmit.json");
        tokio::fs::write(&path, r#"{"trust_store_path": "/var/lib/trust.json"}"#)
            .await
            .unwrap();
        let config = TransmitConfig::from_json_file(&path).await.unwrap();
        assert_eq!(config.trust_store_path, PathBuf::from("/var/lib/trust.json"));

        let missing = TransmitConfig::from_json_file(dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
