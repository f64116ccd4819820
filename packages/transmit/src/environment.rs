//! SEFAZ environments (production and homologation)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// Target environment of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaxEnvironment {
    /// Production, legally binding
    #[default]
    Production,
    /// Homologation (testing)
    Homologation,
}

impl TaxEnvironment {
    /// `tpAmb` value used inside request documents
    #[must_use]
    pub fn tp_amb(self) -> u8 {
        match self {
            Self::Production => 1,
            Self::Homologation => 2,
        }
    }

    /// Environment segment of a routing key
    #[must_use]
    pub fn route_key(self) -> &'static str {
        match self {
            Self::Production => "PROD",
            Self::Homologation => "HOM",
        }
    }
}

impl fmt::Display for TaxEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route_key())
    }
}

impl FromStr for TaxEnvironment {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROD" | "PRODUCAO" | "PRODUCTION" | "1" => Ok(Self::Production),
            "HOM" | "HOMOLOGACAO" | "HOMOLOGATION" | "2" => Ok(Self::Homologation),
            other => Err(PayloadError::InvalidField {
                field: "environment",
                reason: format!("'{other}' is neither production nor homologation"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_route_keys_and_tp_amb() {
        assert_eq!("prod".parse::<TaxEnvironment>(), Ok(TaxEnvironment::Production));
        assert_eq!("2".parse::<TaxEnvironment>(), Ok(TaxEnvironment::Homologation));
        assert_eq!(TaxEnvironment::Homologation.route_key(), "HOM");
        assert_eq!(TaxEnvironment::Production.tp_amb(), 1);
        assert!("staging".parse::<TaxEnvironment>().is_err());
    }
}
