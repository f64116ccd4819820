//! Trust anchors for SEFAZ endpoints
//!
//! - [`TrustStoreBuilder`] builds and persists the custom store (ICP-Brasil
//!   roots plus harvested server certificates)
//! - [`TrustManagerProvider`] merges it with the platform store for rustls
//! - [`PinnedLeafVerifier`] validates channel peers against the merged trust

use std::sync::Arc;

use rustls::crypto::CryptoProvider;

pub mod anchors;
pub mod builder;
pub mod harvest;
pub mod http_client;
pub mod parser;
pub mod provider;
pub mod verifier;

pub use anchors::{AnchorSource, TrustAnchor, TrustAnchorSet};
pub use builder::TrustStoreBuilder;
pub use harvest::HostHarvester;
pub use http_client::TrustHttpClient;
pub use provider::{platform_roots, MergedTrust, TrustManagerProvider};
pub use verifier::PinnedLeafVerifier;

/// The ring-backed crypto provider every TLS configuration in this crate uses
#[must_use]
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}
