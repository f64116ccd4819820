//! All components wired from one [`TransmitConfig`]

use std::sync::Arc;

use fiscal_xmldsig::{DocumentSigner, SignedDocument};

use crate::channel::{SecureChannelFactory, Transport};
use crate::config::TransmitConfig;
use crate::credential::CredentialStore;
use crate::error::{PipelineError, SetupError, TrustStoreError};
use crate::identity::TaxpayerIdentity;
use crate::pipeline::{
    TransmissionFailure, TransmissionPipeline, TransmissionRequest, TransmissionResponse,
};
use crate::routing::ServiceRouter;
use crate::tls::{MergedTrust, TrustManagerProvider, TrustStoreBuilder};

/// Entry point for callers that transmit on behalf of registered taxpayers
#[derive(Debug)]
pub struct Transmitter {
    config: TransmitConfig,
    router: Arc<ServiceRouter>,
    credentials: Arc<CredentialStore>,
    trust: Arc<TrustManagerProvider>,
    channels: Arc<SecureChannelFactory>,
    pipeline: TransmissionPipeline,
}

impl Transmitter {
    /// Wire every component from `config`
    ///
    /// The routing table comes from `config.routing_table_path` when set and
    /// from the built-in table otherwise. Every HTTPS endpoint of the table is
    /// a harvest target of the custom trust store. Nothing touches the network
    /// until the first transmission or [`Transmitter::ensure_trust_store`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the configuration is invalid
    /// - the routing table cannot be read or parsed
    /// - the trust store clients cannot be created
    pub async fn from_config(config: TransmitConfig) -> Result<Self, SetupError> {
        config.validate()?;

        let router = match &config.routing_table_path {
            Some(path) => ServiceRouter::from_file(path).await?,
            None => ServiceRouter::builtin()?,
        };
        let router = Arc::new(router);

        let builder = Arc::new(TrustStoreBuilder::new(&config, router.https_hosts())?);
        let trust = Arc::new(TrustManagerProvider::new(builder, config.platform_roots));
        let credentials = Arc::new(CredentialStore::new());
        let channels = Arc::new(SecureChannelFactory::new(
            Arc::clone(&credentials),
            Arc::clone(&trust),
            &config,
        ));
        let transport: Arc<dyn Transport> = Arc::clone(&channels) as Arc<dyn Transport>;
        let pipeline = TransmissionPipeline::new(Arc::clone(&router), Arc::clone(&credentials), transport);

        tracing::info!(
            routes = router.len(),
            trust_store = %config.trust_store_path.display(),
            "transmitter ready"
        );

        Ok(Self {
            config,
            router,
            credentials,
            trust,
            channels,
            pipeline,
        })
    }

    /// Make sure the custom trust store exists and return the merged trust
    ///
    /// # Errors
    ///
    /// Returns an error if the custom store cannot be built or loaded, the
    /// platform store is unavailable, or the merged set is empty.
    pub async fn ensure_trust_store(&self) -> Result<Arc<MergedTrust>, TrustStoreError> {
        self.trust.active_trust().await
    }

    /// Rebuild the merged trust and drop every cached channel
    ///
    /// # Errors
    ///
    /// Same conditions as [`Transmitter::ensure_trust_store`]; on error the
    /// previous trust and channels stay in use.
    pub async fn refresh_trust(&self) -> Result<Arc<MergedTrust>, TrustStoreError> {
        let merged = self.trust.refresh().await?;
        self.channels.evict_all();
        Ok(merged)
    }

    /// Transmit one request
    ///
    /// # Errors
    ///
    /// See [`TransmissionPipeline::transmit`].
    pub async fn transmit(
        &self,
        request: &TransmissionRequest,
    ) -> Result<TransmissionResponse, TransmissionFailure> {
        self.pipeline.transmit(request).await
    }

    /// Sign a document with the taxpayer's credential without sending it
    ///
    /// # Errors
    ///
    /// Returns an error if the credential cannot be loaded or the document
    /// cannot be signed.
    pub async fn sign(
        &self,
        identity: &TaxpayerIdentity,
        xml: &str,
    ) -> Result<SignedDocument, PipelineError> {
        let credential = self.credentials.load(identity).await?;
        Ok(DocumentSigner::new().sign(xml, credential.as_ref())?)
    }

    /// Forget the cached credential and channel of a re-registered taxpayer
    pub fn reregister(&self, fiscal_id: &str) {
        let credential = self.credentials.evict(fiscal_id);
        let channel = self.channels.evict(fiscal_id);
        tracing::info!(%fiscal_id, credential, channel, "taxpayer caches evicted");
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &TransmitConfig {
        &self.config
    }

    /// Routing table in use
    #[must_use]
    pub fn router(&self) -> &ServiceRouter {
        &self.router
    }

    /// Credential cache
    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Channel factory
    #[must_use]
    pub fn channels(&self) -> &SecureChannelFactory {
        &self.channels
    }
}
