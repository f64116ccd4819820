//! Mutually authenticated HTTPS channels to SEFAZ endpoints

use async_trait::async_trait;

pub mod factory;
pub mod secure;

pub use factory::SecureChannelFactory;
pub use secure::{SecureChannel, TransportResponse, SOAP_CONTENT_TYPE};

use crate::error::TransportError;
use crate::identity::TaxpayerIdentity;

/// Sends an envelope on behalf of a taxpayer
///
/// [`SecureChannelFactory`] is the production implementation; the pipeline
/// only sees this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `envelope` to `address` authenticated as `identity`
    async fn send(
        &self,
        identity: &TaxpayerIdentity,
        address: &str,
        envelope: &str,
    ) -> Result<TransportResponse, TransportError>;
}
