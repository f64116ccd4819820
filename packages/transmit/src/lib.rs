#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

//! Fiscal document transmission to SEFAZ web services over mutual TLS
//!
//! A [`Transmitter`] resolves the endpoint of a request, signs the payload with
//! the taxpayer's certificate when the service requires it, wraps it in the
//! SOAP 1.2 envelope and posts it over a channel that presents the same
//! certificate. Server certificates are checked against a custom trust store
//! (ICP-Brasil roots plus certificates harvested from the endpoints) merged
//! with the platform store.
//!
//! ```no_run
//! use fiscal_transmit::{TaxpayerIdentity, TransmitConfig, TransmissionRequest, Transmitter};
//! use secrecy::SecretString;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transmitter = Transmitter::from_config(TransmitConfig::homologation()).await?;
//! let identity = TaxpayerIdentity::new(
//!     "11222333000181",
//!     "certs/11222333000181.pfx",
//!     SecretString::from("bundle passphrase"),
//!     "SP",
//! );
//! let request = TransmissionRequest::new(identity, "STATUS", "HOM", "<consStatServ/>");
//! let response = transmitter.transmit(&request).await?;
//! println!("{} {}", response.status, response.body);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod channel;
pub mod config;
pub mod credential;
pub mod envelope;
pub mod environment;
pub mod error;
pub mod identity;
pub mod payload;
pub mod pipeline;
pub mod region;
pub mod routing;
pub mod service;
pub mod tls;
pub mod transmitter;

pub use channel::{SecureChannel, SecureChannelFactory, Transport, TransportResponse};
pub use config::{PlatformRoots, TransmitConfig};
pub use credential::{CredentialHandle, CredentialStore};
pub use envelope::EnvelopeBuilder;
pub use environment::TaxEnvironment;
pub use error::{
    ChannelError, ConfigError, CredentialError, EnvelopeError, ErrorKind, PayloadError,
    PipelineError, RouteError, SetupError, TransportError, TrustStoreError,
};
pub use identity::TaxpayerIdentity;
pub use payload::{NumberVoiding, ProtocolQuery, StatusQuery};
pub use pipeline::{
    TransmissionFailure, TransmissionPipeline, TransmissionRequest, TransmissionResponse,
    TransmissionState,
};
pub use region::Region;
pub use routing::{HostPort, RouteKey, ServiceRouter};
pub use service::FiscalService;
pub use tls::{MergedTrust, TrustAnchor, TrustAnchorSet, TrustManagerProvider, TrustStoreBuilder};
pub use transmitter::Transmitter;

pub use fiscal_xmldsig::{DocumentSigner, SignedDocument, SigningError};
