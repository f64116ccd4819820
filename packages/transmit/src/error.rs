//! Error types for each stage of the transmission pipeline
//!
//! Every error is `Clone` so a single-flight load can hand the same failure to
//! all of its waiters. No variant ever carries a passphrase or key material.

use fiscal_xmldsig::SigningError;
use thiserror::Error;

use crate::cache::LoadAborted;

/// Configuration loading errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read configuration {path}: {reason}")]
    Io { path: String, reason: String },

    /// Configuration file is not valid JSON for [`crate::TransmitConfig`]
    #[error("Invalid configuration: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Key bundle loading errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Bundle file is missing or unreadable
    #[error("Key bundle {path} is not readable: {reason}")]
    BundleUnreadable { path: String, reason: String },

    /// The bundle integrity check failed under the given passphrase
    #[error("Key bundle passphrase rejected for taxpayer {0}")]
    WrongPassphrase(String),

    /// Bundle is not a valid PKCS#12 structure
    #[error("Malformed key bundle: {0}")]
    MalformedBundle(String),

    /// Bundle has no private key entry
    #[error("Key bundle contains no private key entry")]
    NoKeyEntry,

    /// Bundle has more than one private key entry
    #[error("Key bundle contains {0} private key entries, expected exactly one")]
    AmbiguousKeyEntries(usize),

    /// No certificate in the bundle belongs to the private key
    #[error("No certificate in the key bundle matches its private key")]
    NoMatchingCertificate,

    /// Internal error occurred
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LoadAborted> for CredentialError {
    fn from(err: LoadAborted) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Trust store construction and loading errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustStoreError {
    /// File operation failed
    #[error("File operation failed: {0}")]
    FileOperation(String),

    /// Persisted trust store could not be decoded
    #[error("Persisted trust store is corrupt: {0}")]
    Corrupt(String),

    /// Certificate parsing failed
    #[error("Certificate parsing failed: {0}")]
    CertificateParsing(String),

    /// Network error while fetching a root or harvesting a host
    #[error("Network error: {0}")]
    Network(String),

    /// Handshake with a harvested host timed out
    #[error("Timed out after {seconds}s harvesting {host}")]
    HarvestTimeout { host: String, seconds: u64 },

    /// HTTP client initialization failed
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(String),

    /// The platform certificate store could not be loaded at all
    #[error("Platform trust store unavailable: {0}")]
    PlatformUnavailable(String),

    /// The merged trust set contains no usable anchor
    #[error("Trust set contains no usable anchors")]
    NoUsableAnchors,

    /// Internal error occurred
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Secure channel construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The identity's credential could not be loaded
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The trust anchors could not be obtained
    #[error(transparent)]
    TrustStore(#[from] TrustStoreError),

    /// rustls rejected the key, chain or anchors
    #[error("TLS configuration failed: {0}")]
    Tls(String),

    /// The HTTP client could not be built
    #[error("HTTP client construction failed: {0}")]
    Client(String),

    /// Internal error occurred
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LoadAborted> for ChannelError {
    fn from(err: LoadAborted) -> Self {
        Self::Internal(err.to_string())
    }
}

/// SOAP envelope construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Service name has no entry in the service catalog
    #[error("Unsupported fiscal service: {0}")]
    UnsupportedService(String),

    /// Region is neither a known state abbreviation nor an IBGE code
    #[error("Unknown region: {0}")]
    UnknownRegion(String),
}

/// Routing table errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No address for the requested key
    #[error("No service address configured for {0}")]
    NotFound(String),

    /// A routing table line could not be parsed
    #[error("Invalid routing table line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    /// Routing table file could not be read
    #[error("Failed to read routing table {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Request document construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// A field value violates the document layout
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Errors from a single outbound SOAP call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The secure channel could not be obtained
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The endpoint answered with a non-success status
    #[error("Endpoint returned HTTP {status}")]
    Status { status: u16, body: String },

    /// Connect or send timeout elapsed
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection or protocol failure
    #[error("Network error: {0}")]
    Network(String),
}

/// Errors assembling a [`crate::Transmitter`] from configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// Configuration is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Routing table could not be loaded
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Trust store components could not be created
    #[error(transparent)]
    TrustStore(#[from] TrustStoreError),
}

/// Coarse classification of pipeline failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No route for the request
    RouteNotFound,
    /// Service not in the catalog
    UnsupportedService,
    /// Region not recognized
    UnknownRegion,
    /// Key bundle problem
    Credential,
    /// Trust store problem
    TrustStore,
    /// TLS or client setup problem
    Channel,
    /// XML signature problem
    Signing,
    /// Endpoint answered with an error status
    RemoteStatus,
    /// Timeout on connect or send
    Timeout,
    /// Other network failure
    Network,
    /// Invalid request document fields
    Payload,
}

/// Any failure of a transmission
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Route resolution failed
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Envelope construction failed
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Credential loading failed
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Signing failed
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// Channel construction failed
    #[error(transparent)]
    Channel(ChannelError),

    /// The call itself failed
    #[error(transparent)]
    Transport(TransportError),

    /// Request document could not be built
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl From<ChannelError> for PipelineError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Credential(e) => Self::Credential(e),
            other => Self::Channel(other),
        }
    }
}

impl From<TransportError> for PipelineError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Channel(e) => Self::from(e),
            other => Self::Transport(other),
        }
    }
}

impl PipelineError {
    /// Classify the failure
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Route(_) => ErrorKind::RouteNotFound,
            Self::Envelope(EnvelopeError::UnsupportedService(_)) => ErrorKind::UnsupportedService,
            Self::Envelope(EnvelopeError::UnknownRegion(_)) => ErrorKind::UnknownRegion,
            Self::Credential(_) => ErrorKind::Credential,
            Self::Signing(_) => ErrorKind::Signing,
            Self::Channel(ChannelError::TrustStore(_)) => ErrorKind::TrustStore,
            Self::Channel(ChannelError::Credential(_)) => ErrorKind::Credential,
            Self::Channel(_) => ErrorKind::Channel,
            Self::Transport(TransportError::Status { .. }) => ErrorKind::RemoteStatus,
            Self::Transport(TransportError::Timeout(_)) => ErrorKind::Timeout,
            Self::Transport(TransportError::Channel(_)) => ErrorKind::Channel,
            Self::Transport(TransportError::Network(_)) => ErrorKind::Network,
            Self::Payload(_) => ErrorKind::Payload,
        }
    }
}
