//! Service address resolution
//!
//! The routing table maps `MODEL.SERVICE.REGION.ENVIRONMENT` keys to endpoint
//! URLs. Keys are matched case-insensitively and there is no fallback: an
//! absent tuple is an error for that call.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

use reqwest::Url;

use crate::error::RouteError;

/// Table shipped with the crate
pub const BUILTIN_ROUTING_TABLE: &str = include_str!("../resources/sefaz-urls.ini");

/// Lookup key of one route
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    model: String,
    service: String,
    region: String,
    environment: String,
}

impl RouteKey {
    /// Build a key; every part is upper-cased
    pub fn new(model: &str, service: &str, region: &str, environment: &str) -> Self {
        Self {
            model: normalize(model),
            service: normalize(service),
            region: normalize(region),
            environment: normalize(environment),
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('.');
        let key = Self::new(parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        let complete = [&key.model, &key.service, &key.region, &key.environment]
            .iter()
            .all(|part| !part.is_empty());
        (parts.next().is_none() && complete).then_some(key)
    }
}

fn normalize(part: &str) -> String {
    part.trim().to_ascii_uppercase()
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.model, self.service, self.region, self.environment
        )
    }
}

/// An HTTPS endpoint's host and port
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostPort {
    /// DNS name or IP literal
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl HostPort {
    /// Create a host/port pair
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host and port of an `https` URL; `None` for other schemes
    #[must_use]
    pub fn from_https_url(url: &str) -> Option<Self> {
        let url = Url::parse(url).ok()?;
        if url.scheme() != "https" {
            return None;
        }
        let host = url.host_str()?.trim_start_matches('[').trim_end_matches(']');
        Some(Self::new(host, url.port_or_known_default()?))
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Read-only routing table
#[derive(Debug, Clone, Default)]
pub struct ServiceRouter {
    routes: HashMap<RouteKey, String>,
}

impl ServiceRouter {
    /// Router over the table shipped with the crate
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in table is malformed.
    pub fn builtin() -> Result<Self, RouteError> {
        Self::from_table(BUILTIN_ROUTING_TABLE)
    }

    /// Parse a routing table
    ///
    /// Blank lines and `#` comments are skipped; the value is everything after
    /// the first `=`. A repeated key keeps its last value.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidLine`] for a line without `=`, a key
    /// without exactly four non-empty parts or an empty URL.
    pub fn from_table(table: &str) -> Result<Self, RouteError> {
        let mut routes = HashMap::new();
        for (index, line) in table.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let invalid = |reason: &str| RouteError::InvalidLine {
                line: index + 1,
                reason: reason.to_string(),
            };
            let (raw_key, url) = line.split_once('=').ok_or_else(|| invalid("missing '='"))?;
            let key = RouteKey::parse(raw_key)
                .ok_or_else(|| invalid("key must be MODEL.SERVICE.REGION.ENVIRONMENT"))?;
            let url = url.trim();
            if url.is_empty() {
                return Err(invalid("empty address"));
            }
            if let Some(previous) = routes.insert(key, url.to_string()) {
                tracing::warn!(line = index + 1, %previous, "routing key redefined");
            }
        }
        tracing::debug!(routes = routes.len(), "routing table loaded");
        Ok(Self { routes })
    }

    /// Load a routing table file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, RouteError> {
        let path = path.as_ref();
        let table = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RouteError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::from_table(&table)
    }

    /// Address configured for the exact tuple
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::NotFound`] if the tuple has no entry.
    pub fn resolve(
        &self,
        model: &str,
        service: &str,
        region: &str,
        environment: &str,
    ) -> Result<&str, RouteError> {
        let key = RouteKey::new(model, service, region, environment);
        match self.routes.get(&key) {
            Some(url) => Ok(url),
            None => Err(RouteError::NotFound(key.to_string())),
        }
    }

    /// Distinct HTTPS endpoints in the table, sorted
    #[must_use]
    pub fn https_hosts(&self) -> Vec<HostPort> {
        self.routes
            .values()
            .filter_map(|url| HostPort::from_https_url(url))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Every route, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&RouteKey, &str)> {
        self.routes.iter().map(|(key, url)| (key, url.as_str()))
    }
}
