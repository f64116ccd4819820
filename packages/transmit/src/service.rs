//! Catalog of supported SEFAZ web services
//!
//! Each operation maps to its WSDL name, the `versaoDados` it expects and
//! whether the request document must carry an XML signature.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;

/// Base of the per-service WSDL namespace
pub const WSDL_NAMESPACE_BASE: &str = "http://www.portalfiscal.inf.br/nfe/wsdl/";

/// A supported fiscal web service operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FiscalService {
    /// Service status query
    Status,
    /// Document protocol query
    Consulta,
    /// Taxpayer registry query
    ConsultaCadastro,
    /// Batch authorization receipt query
    RetAutorizacao,
    /// Document authorization
    Autorizacao,
    /// Number range voiding
    Inutilizacao,
    /// Event registration (cancellation, correction letter, ...)
    Evento,
}

/// Static facts about one service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Routing table and request key, e.g. `STATUS`
    pub key: &'static str,
    /// WSDL name used in the SOAP namespaces
    pub wsdl: &'static str,
    /// `versaoDados` header value
    pub data_version: &'static str,
    /// Whether the payload must be signed before sending
    pub requires_signature: bool,
}

const CATALOG: [(FiscalService, ServiceDescriptor); 7] = [
    (FiscalService::Status, descriptor("STATUS", "NFeStatusServico4", "4.00", false)),
    (FiscalService::Consulta, descriptor("CONSULTA", "NFeConsultaProtocolo4", "4.00", false)),
    (
        FiscalService::ConsultaCadastro,
        descriptor("CONSULTA_CADASTRO", "CadConsultaCadastro4", "2.00", false),
    ),
    (
        FiscalService::RetAutorizacao,
        descriptor("RET_AUTORIZACAO", "NFeRetAutorizacao4", "4.00", false),
    ),
    (FiscalService::Autorizacao, descriptor("AUTORIZACAO", "NFeAutorizacao4", "4.00", true)),
    (FiscalService::Inutilizacao, descriptor("INUTILIZACAO", "NFeInutilizacao4", "4.00", true)),
    (FiscalService::Evento, descriptor("EVENTO", "NFeRecepcaoEvento4", "1.00", true)),
];

const fn descriptor(
    key: &'static str,
    wsdl: &'static str,
    data_version: &'static str,
    requires_signature: bool,
) -> ServiceDescriptor {
    ServiceDescriptor {
        key,
        wsdl,
        data_version,
        requires_signature,
    }
}

impl FiscalService {
    /// Find a service by its key, ignoring case
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnsupportedService`] for names outside the catalog.
    pub fn lookup(name: &str) -> Result<Self, EnvelopeError> {
        let name = name.trim();
        CATALOG
            .iter()
            .find(|(_, d)| d.key.eq_ignore_ascii_case(name))
            .map(|(service, _)| *service)
            .ok_or_else(|| EnvelopeError::UnsupportedService(name.to_string()))
    }

    /// Static facts about this service
    #[must_use]
    pub fn descriptor(self) -> &'static ServiceDescriptor {
        // catalog rows are in declaration order
        &CATALOG[self as usize].1
    }

    /// Routing key, e.g. `INUTILIZACAO`
    #[must_use]
    pub fn key(self) -> &'static str {
        self.descriptor().key
    }

    /// Whether the payload must be signed
    #[must_use]
    pub fn requires_signature(self) -> bool {
        self.descriptor().requires_signature
    }

    /// Namespace of `nfeCabecMsg` and `nfeDadosMsg` for this service
    #[must_use]
    pub fn wsdl_namespace(self) -> String {
        format!("{WSDL_NAMESPACE_BASE}{}", self.descriptor().wsdl)
    }

    /// Every catalogued service
    pub fn all() -> impl Iterator<Item = FiscalService> {
        CATALOG.iter().map(|(service, _)| *service)
    }
}

impl fmt::Display for FiscalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for FiscalService {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_requirement_follows_the_catalog() {
        let signed: Vec<_> = FiscalService::all()
            .filter(|s| s.requires_signature())
            .map(FiscalService::key)
            .collect();
        assert_eq!(signed, ["AUTORIZACAO", "INUTILIZACAO", "EVENTO"]);
    }

    #[test]
    fn every_variant_has_its_own_row() {
        for (index, service) in FiscalService::all().enumerate() {
            assert_eq!(service as usize, index);
            assert_eq!(FiscalService::lookup(service.key()), Ok(service));
        }
        assert_eq!(FiscalService::ConsultaCadastro.descriptor().data_version, "2.00");
        assert_eq!(FiscalService::Evento.descriptor().data_version, "1.00");
    }

    #[test]
    fn lookup_is_case_insensitive_and_closed() {
        assert_eq!(FiscalService::lookup("status"), Ok(FiscalService::Status));
        assert_eq!(
            FiscalService::lookup("DISTRIBUICAO_DFE"),
            Err(EnvelopeError::UnsupportedService("DISTRIBUICAO_DFE".to_string()))
        );
    }

    #[test]
    fn namespace_uses_wsdl_name() {
        assert_eq!(
            FiscalService::Inutilizacao.wsdl_namespace(),
            "http://www.portalfiscal.inf.br/nfe/wsdl/NFeInutilizacao4"
        );
    }
}
