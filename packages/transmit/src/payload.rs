//! Request documents the transmitter builds itself
//!
//! Authorization and event documents come from the caller; status queries,
//! protocol queries and number-range voiding are simple enough to be built
//! from a handful of fields.

use chrono::Datelike;
use quick_xml::escape::escape;

use crate::environment::TaxEnvironment;
use crate::error::PayloadError;
use crate::region::Region;

/// Namespace of NF-e request documents
pub const NFE_NAMESPACE: &str = "http://www.portalfiscal.inf.br/nfe";

const NFE_VERSION: &str = "4.00";

/// NF-e model code
const MODEL_NFE: &str = "55";

/// `consStatServ`: service status query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusQuery {
    /// Target environment
    pub environment: TaxEnvironment,
    /// State whose service is queried
    pub region: Region,
}

impl StatusQuery {
    /// Render the document
    #[must_use]
    pub fn to_xml(&self) -> String {
        format!(
            "<consStatServ xmlns=\"{NFE_NAMESPACE}\" versao=\"{NFE_VERSION}\">\
             <tpAmb>{}</tpAmb><cUF>{}</cUF><xServ>STATUS</xServ></consStatServ>",
            self.environment.tp_amb(),
            self.region.ibge_code(),
        )
    }
}

/// `consSitNFe`: protocol query for one access key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolQuery {
    environment: TaxEnvironment,
    access_key: String,
}

impl ProtocolQuery {
    /// Create a query for a 44-digit access key
    ///
    /// # Errors
    ///
    /// Returns an error if the access key is not 44 digits.
    pub fn new(environment: TaxEnvironment, access_key: &str) -> Result<Self, PayloadError> {
        let access_key = access_key.trim();
        require_digits("chNFe", access_key, 44)?;
        Ok(Self {
            environment,
            access_key: access_key.to_string(),
        })
    }

    /// Render the document
    #[must_use]
    pub fn to_xml(&self) -> String {
        format!(
            "<consSitNFe xmlns=\"{NFE_NAMESPACE}\" versao=\"{NFE_VERSION}\">\
             <tpAmb>{}</tpAmb><xServ>CONSULTAR</xServ><chNFe>{}</chNFe></consSitNFe>",
            self.environment.tp_amb(),
            self.access_key,
        )
    }
}

/// `inutNFe`: voiding of an unused number range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberVoiding {
    environment: TaxEnvironment,
    region: Region,
    year: u16,
    cnpj: String,
    series: u16,
    first: u32,
    last: u32,
    justification: String,
}

impl NumberVoiding {
    /// Voiding request dated in the current year
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the CNPJ is not 14 digits
    /// - the series is above 999
    /// - the range is empty, starts at zero or exceeds 999999999
    /// - the justification is shorter than 15 or longer than 255 characters
    pub fn new(
        environment: TaxEnvironment,
        region: Region,
        cnpj: &str,
        series: u16,
        first: u32,
        last: u32,
        justification: &str,
    ) -> Result<Self, PayloadError> {
        let year = (chrono::Utc::now().year() % 100) as u16;
        Self::for_year(environment, region, year, cnpj, series, first, last, justification)
    }

    /// Voiding request for an explicit two-digit year
    ///
    /// # Errors
    ///
    /// Same conditions as [`NumberVoiding::new`], plus a year above 99.
    #[allow(clippy::too_many_arguments)]
    pub fn for_year(
        environment: TaxEnvironment,
        region: Region,
        year: u16,
        cnpj: &str,
        series: u16,
        first: u32,
        last: u32,
        justification: &str,
    ) -> Result<Self, PayloadError> {
        let cnpj = cnpj.trim();
        require_digits("CNPJ", cnpj, 14)?;
        if year > 99 {
            return Err(invalid("ano", "must be the two-digit year"));
        }
        if series > 999 {
            return Err(invalid("serie", "must be between 0 and 999"));
        }
        if first == 0 || first > last || last > 999_999_999 {
            return Err(invalid(
                "nNFIni/nNFFin",
                "range must satisfy 1 <= first <= last <= 999999999",
            ));
        }
        let justification = justification.trim();
        let length = justification.chars().count();
        if !(15..=255).contains(&length) {
            return Err(invalid("xJust", "must have between 15 and 255 characters"));
        }
        Ok(Self {
            environment,
            region,
            year,
            cnpj: cnpj.to_string(),
            series,
            first,
            last,
            justification: justification.to_string(),
        })
    }

    /// `infInut` identifier: `ID` + cUF + year + CNPJ + model + series + first + last
    #[must_use]
    pub fn id(&self) -> String {
        format!(
            "ID{:02}{:02}{}{MODEL_NFE}{:03}{:09}{:09}",
            self.region.ibge_code(),
            self.year,
            self.cnpj,
            self.series,
            self.first,
            self.last,
        )
    }

    /// Render the unsigned document
    #[must_use]
    pub fn to_xml(&self) -> String {
        format!(
            "<inutNFe xmlns=\"{NFE_NAMESPACE}\" versao=\"{NFE_VERSION}\">\
             <infInut Id=\"{}\"><tpAmb>{}</tpAmb><xServ>INUTILIZAR</xServ>\
             <cUF>{}</cUF><ano>{:02}</ano><CNPJ>{}</CNPJ><mod>{MODEL_NFE}</mod>\
             <serie>{}</serie><nNFIni>{}</nNFIni><nNFFin>{}</nNFFin>\
             <xJust>{}</xJust></infInut></inutNFe>",
            self.id(),
            self.environment.tp_amb(),
            self.region.ibge_code(),
            self.year,
            self.cnpj,
            self.series,
            self.first,
            self.last,
            escape(self.justification.as_str()),
        )
    }
}

fn require_digits(field: &'static str, value: &str, len: usize) -> Result<(), PayloadError> {
    if value.len() == len && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(invalid(field, &format!("must be {len} digits")))
    }
}

fn invalid(field: &'static str, reason: &str) -> PayloadError {
    PayloadError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}
