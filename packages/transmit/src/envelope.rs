//! SOAP 1.2 envelopes for SEFAZ web services

use crate::error::EnvelopeError;
use crate::region::Region;
use crate::service::FiscalService;

/// SOAP 1.2 envelope namespace
pub const SOAP12_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Wraps request documents in the envelope each service expects
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeBuilder;

impl EnvelopeBuilder {
    /// Create a builder
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Wrap `payload` for the named service and region
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `service_name` is not in the service catalog
    /// - `region` is neither a state abbreviation nor an IBGE code
    pub fn wrap(
        &self,
        payload: &str,
        service_name: &str,
        region: &str,
    ) -> Result<String, EnvelopeError> {
        let service = FiscalService::lookup(service_name)?;
        let region = Region::lookup(region)?;
        Ok(self.wrap_for(payload, service, region))
    }

    /// Wrap `payload` for an already resolved service and region
    ///
    /// The payload is carried verbatim apart from a leading byte order mark,
    /// whitespace and XML declaration, none of which can appear inside the body.
    #[must_use]
    pub fn wrap_for(&self, payload: &str, service: FiscalService, region: Region) -> String {
        let namespace = service.wsdl_namespace();
        let body = strip_xml_declaration(payload);
        let mut envelope = String::with_capacity(body.len() + 2 * namespace.len() + 320);
        envelope.push_str("<soap:Envelope xmlns:soap=\"");
        envelope.push_str(SOAP12_NAMESPACE);
        envelope.push_str("\"><soap:Header><nfeCabecMsg xmlns=\"");
        envelope.push_str(&namespace);
        envelope.push_str("\"><cUF>");
        envelope.push_str(&region.ibge_code().to_string());
        envelope.push_str("</cUF><versaoDados>");
        envelope.push_str(service.descriptor().data_version);
        envelope.push_str("</versaoDados></nfeCabecMsg></soap:Header><soap:Body><nfeDadosMsg xmlns=\"");
        envelope.push_str(&namespace);
        envelope.push_str("\">");
        envelope.push_str(body);
        envelope.push_str("</nfeDadosMsg></soap:Body></soap:Envelope>");
        envelope
    }
}

fn strip_xml_declaration(payload: &str) -> &str {
    let trimmed = payload.trim_start_matches('\u{feff}').trim_start();
    match trimmed.strip_prefix("<?xml") {
        Some(rest) => match rest.find("?>") {
            Some(end) => rest[end + 2..].trim_start(),
            None => trimmed,
        },
        None => trimmed,
    }
}
