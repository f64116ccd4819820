//! HTTP client for root certificate downloads

use std::time::Duration;

use reqwest::Client;

use crate::error::TrustStoreError;

/// HTTP client wrapper for trust-store downloads
#[derive(Clone, Debug)]
pub struct TrustHttpClient {
    client: Client,
}

impl TrustHttpClient {
    /// Create a client whose requests are bounded by `timeout`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TrustStoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TrustStoreError::HttpClientInit(e.to_string()))?;

        Ok(Self { client })
    }

    /// Download a certificate and return its DER encoding
    ///
    /// The authority serves some roots as DER and others as PEM; both are
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the request fails or times out
    /// - the server returns an error status
    /// - a PEM body cannot be decoded
    pub async fn get_root_certificate(&self, url: &str) -> Result<Vec<u8>, TrustStoreError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            TrustStoreError::Network(format!("root certificate download from {url} failed: {e}"))
        })?;

        if !response.status().is_success() {
            return Err(TrustStoreError::Network(format!(
                "root certificate server {url} returned status: {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TrustStoreError::Network(format!("failed to read {url}: {e}")))?;

        if body.starts_with(b"-----BEGIN") {
            let parsed = pem::parse(&body[..]).map_err(|e| {
                TrustStoreError::CertificateParsing(format!("invalid PEM from {url}: {e}"))
            })?;
            return Ok(parsed.into_contents());
        }

        Ok(body.to_vec())
    }
}
