//! Taxpayer credentials from PKCS#12 key bundles

pub mod bundle;
pub mod holder;
pub mod store;

pub use bundle::{decode_bundle, CredentialHandle};
pub use holder::CertificateHolder;
pub use store::{CredentialStats, CredentialStore};
