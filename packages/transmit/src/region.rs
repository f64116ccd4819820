//! Brazilian federative units and their IBGE codes

use std::fmt;
use std::str::FromStr;

use crate::error::EnvelopeError;

/// A federative unit (state or Federal District)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    abbreviation: &'static str,
    ibge_code: u8,
}

const REGIONS: [Region; 27] = [
    Region::new("RO", 11),
    Region::new("AC", 12),
    Region::new("AM", 13),
    Region::new("RR", 14),
    Region::new("PA", 15),
    Region::new("AP", 16),
    Region::new("TO", 17),
    Region::new("MA", 21),
    Region::new("PI", 22),
    Region::new("CE", 23),
    Region::new("RN", 24),
    Region::new("PB", 25),
    Region::new("PE", 26),
    Region::new("AL", 27),
    Region::new("SE", 28),
    Region::new("BA", 29),
    Region::new("MG", 31),
    Region::new("ES", 32),
    Region::new("RJ", 33),
    Region::new("SP", 35),
    Region::new("PR", 41),
    Region::new("SC", 42),
    Region::new("RS", 43),
    Region::new("MS", 50),
    Region::new("MT", 51),
    Region::new("GO", 52),
    Region::new("DF", 53),
];

impl Region {
    const fn new(abbreviation: &'static str, ibge_code: u8) -> Self {
        Self {
            abbreviation,
            ibge_code,
        }
    }

    /// Find a region by abbreviation (any case) or by IBGE code
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnknownRegion`] if nothing matches.
    pub fn lookup(value: &str) -> Result<Self, EnvelopeError> {
        let value = value.trim();
        let found = match value.parse::<u8>() {
            Ok(code) => REGIONS.iter().find(|r| r.ibge_code == code),
            Err(_) => REGIONS
                .iter()
                .find(|r| r.abbreviation.eq_ignore_ascii_case(value)),
        };
        found
            .copied()
            .ok_or_else(|| EnvelopeError::UnknownRegion(value.to_string()))
    }

    /// Two-letter abbreviation, e.g. `SP`
    #[must_use]
    pub fn abbreviation(&self) -> &'static str {
        self.abbreviation
    }

    /// IBGE numeric code, e.g. `35` for São Paulo
    #[must_use]
    pub fn ibge_code(&self) -> u8 {
        self.ibge_code
    }

    /// All 27 federative units
    #[must_use]
    pub fn all() -> &'static [Region] {
        &REGIONS
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation)
    }
}

impl FromStr for Region {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s)
    }
}
