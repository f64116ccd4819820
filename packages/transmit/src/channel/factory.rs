//! Per-taxpayer secure channel construction
//!
//! Each channel is a reqwest client over a preconfigured rustls `ClientConfig`
//! carrying the taxpayer's certificate chain and key. Servers are verified
//! against the merged trust anchors, with harvested leaves accepted by exact
//! match. Channels are built once per fiscal ID with single-flight
//! fill and reused until evicted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::ClientConfig;

use super::secure::{SecureChannel, TransportResponse};
use super::Transport;
use crate::cache::{CacheStats, SingleFlightCache};
use crate::config::TransmitConfig;
use crate::credential::{CredentialHandle, CredentialStore};
use crate::error::{ChannelError, TransportError};
use crate::identity::TaxpayerIdentity;
use crate::tls::{crypto_provider, MergedTrust, PinnedLeafVerifier, TrustManagerProvider};

#[derive(Debug, Clone)]
struct ClientSettings {
    connect_timeout: Duration,
    send_timeout: Duration,
    user_agent: String,
}

/// Builds and caches [`SecureChannel`]s
#[derive(Debug)]
pub struct SecureChannelFactory {
    credentials: Arc<CredentialStore>,
    trust: Arc<TrustManagerProvider>,
    settings: ClientSettings,
    channels: SingleFlightCache<SecureChannel, ChannelError>,
}

impl SecureChannelFactory {
    /// Create a factory over the given credential store and trust provider
    #[must_use]
    pub fn new(
        credentials: Arc<CredentialStore>,
        trust: Arc<TrustManagerProvider>,
        config: &TransmitConfig,
    ) -> Self {
        Self {
            credentials,
            trust,
            settings: ClientSettings {
                connect_timeout: config.connect_timeout,
                send_timeout: config.send_timeout,
                user_agent: config.user_agent.clone(),
            },
            channels: SingleFlightCache::new("channels"),
        }
    }

    /// Channel for `identity`, building it on first use
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the credential cannot be loaded
    /// - the trust anchors cannot be obtained
    /// - rustls rejects the key or chain
    /// - the HTTP client cannot be built
    pub async fn channel_for(
        &self,
        identity: &TaxpayerIdentity,
    ) -> Result<Arc<SecureChannel>, ChannelError> {
        let key = identity.fiscal_id().to_string();
        let credentials = Arc::clone(&self.credentials);
        let trust = Arc::clone(&self.trust);
        let settings = self.settings.clone();
        let identity = identity.clone();

        self.channels
            .get_or_load(&key, move || async move {
                let credential = credentials.load(&identity).await?;
                let merged = trust.active_trust().await?;
                let tls = client_config(&credential, &merged)?;

                let client = reqwest::Client::builder()
                    .use_preconfigured_tls(tls)
                    .connect_timeout(settings.connect_timeout)
                    .timeout(settings.send_timeout)
                    .user_agent(settings.user_agent.as_str())
                    .build()
                    .map_err(|e| ChannelError::Client(e.to_string()))?;

                tracing::info!(
                    fiscal_id = identity.fiscal_id(),
                    anchors = merged.len(),
                    "secure channel built"
                );
                Ok(SecureChannel::new(
                    identity.fiscal_id().to_string(),
                    client,
                    merged.len(),
                ))
            })
            .await
    }

    /// Drop the cached channel for `fiscal_id`
    pub fn evict(&self, fiscal_id: &str) -> bool {
        self.channels.evict(fiscal_id)
    }

    /// Drop every cached channel, e.g. after a trust refresh
    pub fn evict_all(&self) {
        self.channels.clear();
    }

    /// Channel cache counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.channels.stats()
    }
}

#[async_trait]
impl Transport for SecureChannelFactory {
    async fn send(
        &self,
        identity: &TaxpayerIdentity,
        address: &str,
        envelope: &str,
    ) -> Result<TransportResponse, TransportError> {
        let channel = self.channel_for(identity).await?;
        channel.post_soap(address, envelope).await
    }
}

/// rustls client configuration: ring provider, TLS 1.2 and 1.3, HTTP/1.1
///
/// Peers are checked by [`PinnedLeafVerifier`] over the merged trust.
fn client_config(
    credential: &CredentialHandle,
    merged: &MergedTrust,
) -> Result<ClientConfig, ChannelError> {
    let provider = crypto_provider();
    let verifier = PinnedLeafVerifier::new(merged.roots(), merged.pinned(), Arc::clone(&provider))
        .map_err(|e| ChannelError::Tls(format!("server verifier: {e}")))?;

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ChannelError::Tls(format!("protocol versions: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(credential.chain().to_vec(), credential.private_key())
        .map_err(|e| ChannelError::Tls(format!("client certificate rejected: {e}")))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}
