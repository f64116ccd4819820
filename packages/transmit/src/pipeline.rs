//! One transmission, from route resolution to the raw response
//!
//! The pipeline resolves the address, checks the service and region, signs the
//! payload when the service requires it, wraps it in the SOAP envelope and
//! hands it to a [`Transport`] exactly once. It never retries; a failure reports
//! the stage it happened in.

use std::fmt;
use std::sync::Arc;

use fiscal_xmldsig::{DocumentSigner, SignedDocument};
use thiserror::Error;

use crate::channel::Transport;
use crate::credential::CredentialStore;
use crate::envelope::EnvelopeBuilder;
use crate::error::{ErrorKind, PipelineError};
use crate::identity::TaxpayerIdentity;
use crate::region::Region;
use crate::routing::ServiceRouter;
use crate::service::FiscalService;

/// Stage of a transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransmissionState {
    /// Looking up the address, service and region
    ResolvingAddress,
    /// Loading the credential and signing the payload
    Signing,
    /// Building the envelope and calling the endpoint
    Sending,
    /// Response received
    Completed,
    /// Stopped on an error
    Failed,
}

impl fmt::Display for TransmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolvingAddress => "resolving-address",
            Self::Signing => "signing",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything needed for one call
#[derive(Debug, Clone)]
pub struct TransmissionRequest {
    /// Taxpayer the call is made for
    pub identity: TaxpayerIdentity,
    /// Document model, e.g. `NFE`
    pub model: String,
    /// Service name, e.g. `STATUS`
    pub service: String,
    /// Region abbreviation or IBGE code
    pub region: String,
    /// Routing environment, e.g. `PROD`
    pub environment: String,
    /// Request document, unsigned
    pub payload: String,
}

impl TransmissionRequest {
    /// Request using the identity's own model and region
    pub fn new(
        identity: TaxpayerIdentity,
        service: impl Into<String>,
        environment: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            model: identity.model().to_string(),
            region: identity.region().to_string(),
            identity,
            service: service.into(),
            environment: environment.into(),
            payload: payload.into(),
        }
    }

    /// Send to another region than the identity's home region
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Use another document model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Result of a completed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body, unchanged
    pub body: String,
    /// The payload as signed, for services that require a signature
    pub signed_document: Option<SignedDocument>,
}

/// A call that stopped before completion
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transmission failed while {state}: {error}")]
pub struct TransmissionFailure {
    /// Stage the failure happened in
    pub state: TransmissionState,
    /// What went wrong
    #[source]
    pub error: PipelineError,
}

impl TransmissionFailure {
    /// Classification of the underlying error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Runs transmissions over shared routing, credentials and transport
pub struct TransmissionPipeline {
    router: Arc<ServiceRouter>,
    credentials: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    signer: DocumentSigner,
    envelopes: EnvelopeBuilder,
}

impl fmt::Debug for TransmissionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmissionPipeline")
            .field("routes", &self.router.len())
            .field("credentials", &self.credentials.stats())
            .finish_non_exhaustive()
    }
}

impl TransmissionPipeline {
    /// Create a pipeline
    #[must_use]
    pub fn new(
        router: Arc<ServiceRouter>,
        credentials: Arc<CredentialStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            router,
            credentials,
            transport,
            signer: DocumentSigner::new(),
            envelopes: EnvelopeBuilder::new(),
        }
    }

    /// Routing table used by this pipeline
    #[must_use]
    pub fn router(&self) -> &ServiceRouter {
        &self.router
    }

    /// Perform one transmission
    ///
    /// # Errors
    ///
    /// Returns a [`TransmissionFailure`] naming the stage that failed if:
    /// - no route exists for the request
    /// - the service or region is unknown (no network activity happens)
    /// - the credential cannot be loaded or the payload cannot be signed
    /// - the channel cannot be built, the call fails or returns a non-2xx status
    pub async fn transmit(
        &self,
        request: &TransmissionRequest,
    ) -> Result<TransmissionResponse, TransmissionFailure> {
        let fiscal_id = request.identity.fiscal_id();
        let mut state = TransmissionState::ResolvingAddress;
        tracing::debug!(%fiscal_id, %state, service = %request.service, "transmission started");

        let (address, service, region) = self.resolve(request).map_err(|e| fail(state, e))?;

        let mut signed_document = None;
        let mut body = request.payload.as_str();
        if service.requires_signature() {
            state = advance(fiscal_id, state, TransmissionState::Signing);
            let signed = self.sign(request).await.map_err(|e| fail(state, e))?;
            body = signed_document.insert(signed).as_str();
        }

        state = advance(fiscal_id, state, TransmissionState::Sending);
        let envelope = self.envelopes.wrap_for(body, service, region);
        let response = self
            .transport
            .send(&request.identity, address, &envelope)
            .await
            .map_err(|e| fail(state, e.into()))?;

        advance(fiscal_id, state, TransmissionState::Completed);
        Ok(TransmissionResponse {
            status: response.status,
            body: response.body,
            signed_document,
        })
    }

    fn resolve<'a>(
        &'a self,
        request: &TransmissionRequest,
    ) -> Result<(&'a str, FiscalService, Region), PipelineError> {
        // Routing keys use abbreviations; IBGE codes are translated first
        let region = Region::lookup(&request.region);
        let route_region = region
            .as_ref()
            .map_or(request.region.as_str(), |r| r.abbreviation());
        let address = self.router.resolve(
            &request.model,
            &request.service,
            route_region,
            &request.environment,
        )?;
        let service = FiscalService::lookup(&request.service)?;
        Ok((address, service, region?))
    }

    async fn sign(&self, request: &TransmissionRequest) -> Result<SignedDocument, PipelineError> {
        let credential = self.credentials.load(&request.identity).await?;
        Ok(self.signer.sign(&request.payload, credential.as_ref())?)
    }
}

fn advance(
    fiscal_id: &str,
    from: TransmissionState,
    to: TransmissionState,
) -> TransmissionState {
    tracing::debug!(%fiscal_id, %from, %to, "transmission state changed");
    to
}

fn fail(state: TransmissionState, error: PipelineError) -> TransmissionFailure {
    tracing::debug!(%state, to = %TransmissionState::Failed, %error, "transmission failed");
    TransmissionFailure { state, error }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reports_stage_and_kind() {
        let failure = fail(
            TransmissionState::Sending,
            PipelineError::from(crate::error::TransportError::Timeout("30s".to_string())),
        );
        assert_eq!(failure.state, TransmissionState::Sending);
        assert_eq!(failure.kind(), ErrorKind::Timeout);
        assert!(failure.to_string().starts_with("transmission failed while sending"));
    }
}
