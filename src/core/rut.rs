use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chilean tax identifier (Rol Único Tributario).
///
/// Stored as the numeric body plus the modulo-11 check digit. Parsing
/// accepts thousands separators and a lowercase check digit; display is
/// always the canonical `NNNNNNNN-D` form the SII schema expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rut {
    number: u32,
    check_digit: char,
}

/// Placeholder RUT for anonymous receivers (boleta sales without an
/// identified buyer). The SII accepts this fixed value.
pub const GENERIC_RUT: &str = "66666666-6";

/// RUT of the SII itself — the receiver on every envelope sent to the
/// authority.
pub const SII_RUT: &str = "60803000-K";

/// Error parsing or verifying a RUT.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RutError {
    #[error("RUT '{0}' is not in NNNNNNNN-D form")]
    Malformed(String),

    #[error("RUT '{given}' has check digit '{found}', expected '{expected}'")]
    CheckDigit {
        given: String,
        found: char,
        expected: char,
    },
}

impl Rut {
    /// Build a RUT from its numeric body, computing the check digit.
    pub fn from_number(number: u32) -> Self {
        Self {
            number,
            check_digit: check_digit(number),
        }
    }

    /// Numeric body without the check digit.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Check digit (`0`–`9` or `K`).
    pub fn check_digit(&self) -> char {
        self.check_digit
    }

    /// The fixed placeholder receiver RUT (66666666-6).
    pub fn generic() -> Self {
        Self::from_number(66_666_666)
    }

    /// The SII's own RUT (60803000-K).
    pub fn sii() -> Self {
        Self::from_number(60_803_000)
    }
}

impl FromStr for Rut {
    type Err = RutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s
            .trim()
            .chars()
            .filter(|c| *c != '.' && !c.is_whitespace())
            .collect();

        let (body, dv) = cleaned
            .rsplit_once('-')
            .ok_or_else(|| RutError::Malformed(s.to_string()))?;

        let number: u32 = body
            .parse()
            .map_err(|_| RutError::Malformed(s.to_string()))?;

        let found = dv
            .chars()
            .next()
            .filter(|_| dv.len() == 1)
            .map(|c| c.to_ascii_uppercase())
            .ok_or_else(|| RutError::Malformed(s.to_string()))?;

        let expected = check_digit(number);
        if found != expected {
            return Err(RutError::CheckDigit {
                given: s.to_string(),
                found,
                expected,
            });
        }

        Ok(Self {
            number,
            check_digit: expected,
        })
    }
}

impl fmt::Display for Rut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.number, self.check_digit)
    }
}

impl TryFrom<String> for Rut {
    type Error = RutError;

    fn try_from(s: String) -> Result<Self, RutError> {
        s.parse()
    }
}

impl From<Rut> for String {
    fn from(rut: Rut) -> Self {
        rut.to_string()
    }
}

/// Compute the modulo-11 check digit for a RUT body.
///
/// Digits are weighted 2..=7 from the least significant position,
/// cycling. Remainder 10 maps to `K`, 11 to `0`.
pub fn check_digit(number: u32) -> char {
    let mut sum: u32 = 0;
    let mut factor: u32 = 2;
    let mut rest = number;

    while rest > 0 {
        sum += (rest % 10) * factor;
        rest /= 10;
        factor = if factor == 7 { 2 } else { factor + 1 };
    }

    match 11 - (sum % 11) {
        11 => '0',
        10 => 'K',
        d => char::from_digit(d, 10).unwrap_or('0'),
    }
}
