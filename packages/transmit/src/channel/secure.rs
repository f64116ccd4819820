//! A taxpayer-bound HTTPS client

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::error::TransportError;

/// Content type of SOAP 1.2 requests
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Status and body of a successful call, unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

/// HTTPS client presenting one taxpayer's certificate
///
/// Shared by every concurrent call for that taxpayer; holds the trust anchors
/// that were active when it was built.
#[derive(Debug, Clone)]
pub struct SecureChannel {
    fiscal_id: String,
    client: Client,
    anchors: usize,
}

impl SecureChannel {
    pub(crate) fn new(fiscal_id: String, client: Client, anchors: usize) -> Self {
        Self {
            fiscal_id,
            client,
            anchors,
        }
    }

    /// Taxpayer this channel authenticates as
    #[must_use]
    pub fn fiscal_id(&self) -> &str {
        &self.fiscal_id
    }

    /// Number of trust anchors the channel was built with
    #[must_use]
    pub fn anchor_count(&self) -> usize {
        self.anchors
    }

    /// POST a SOAP envelope and return the response verbatim
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the connect or send timeout elapses
    /// - the connection or TLS handshake fails
    /// - the endpoint answers with a non-2xx status (status and body kept)
    pub async fn post_soap(
        &self,
        address: &str,
        envelope: &str,
    ) -> Result<TransportResponse, TransportError> {
        tracing::debug!(fiscal_id = %self.fiscal_id, %address, bytes = envelope.len(), "posting SOAP envelope");

        let response = self
            .client
            .post(address)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope.to_string())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        if !(200..300).contains(&status) {
            tracing::warn!(fiscal_id = %self.fiscal_id, %address, status, "endpoint returned an error status");
            return Err(TransportError::Status { status, body });
        }

        tracing::debug!(fiscal_id = %self.fiscal_id, %address, status, "SOAP response received");
        Ok(TransportResponse { status, body })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout(error_chain(&err));
    }
    TransportError::Network(error_chain(&err))
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
