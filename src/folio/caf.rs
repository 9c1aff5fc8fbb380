use chrono::{Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "formats")]
use super::FolioError;
use crate::core::Rut;

/// Authority-issued folio authorization (Código de Autorización de
/// Folios).
///
/// Grants `issuer` the folio range `[range_start, range_end]` for one
/// document type. Immutable once loaded; authorizations lapse six months
/// after the authorization date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caf {
    pub issuer: Rut,
    pub type_code: u16,
    pub range_start: u64,
    pub range_end: u64,
    /// Authorization date (`FA`).
    pub authorized_on: NaiveDate,
    /// Lapse date, derived from `authorized_on`.
    pub expires_on: NaiveDate,
    /// RSA public key modulus (`RSAPK/M`, base64).
    pub public_modulus: String,
    /// RSA public key exponent (`RSAPK/E`, base64).
    pub public_exponent: String,
    /// Private key (`RSASK`), present in authority-issued files and used
    /// to stamp each document's TED.
    pub private_key: Option<String>,
    /// Authority signature over the authorization data (`FRMA`).
    pub signature: String,
    /// Whether this CAF was synthesized locally instead of issued by the
    /// authority. Production folio retrieval rejects synthesized CAFs.
    pub synthetic: bool,
}

/// Months after the authorization date at which a CAF lapses.
const CAF_VALIDITY_MONTHS: u32 = 6;

impl Caf {
    /// Whether `folio` falls inside the authorized range.
    pub fn contains(&self, folio: u64) -> bool {
        (self.range_start..=self.range_end).contains(&folio)
    }

    /// Number of folios the range covers.
    pub fn capacity(&self) -> u64 {
        self.range_end - self.range_start + 1
    }

    /// Whether the authorization has lapsed on the given date.
    pub fn is_expired(&self, on: NaiveDate) -> bool {
        on > self.expires_on
    }

    /// Structural verification of the signing material: the range must be
    /// coherent and the RSA public key and authority signature present.
    /// Cryptographic verification of `signature` belongs to the external
    /// signing capability.
    pub fn verify(&self) -> Result<(), String> {
        if self.range_start == 0 || self.range_end < self.range_start {
            return Err(format!(
                "incoherent folio range [{}, {}]",
                self.range_start, self.range_end
            ));
        }
        if self.public_modulus.trim().is_empty() || self.public_exponent.trim().is_empty() {
            return Err("RSA public key material missing".into());
        }
        if self.signature.trim().is_empty() {
            return Err("authority signature missing".into());
        }
        Ok(())
    }

    /// Synthesize a CAF for reference and testing use.
    ///
    /// The result carries placeholder signing material and is flagged
    /// `synthetic`; [`super::FolioAuthority`] refuses it unless synthetic
    /// CAFs are explicitly accepted.
    pub fn synthesize(issuer: Rut, type_code: u16, range_start: u64, range_end: u64) -> Self {
        let today = Utc::now().date_naive();
        Self {
            issuer,
            type_code,
            range_start,
            range_end,
            authorized_on: today,
            expires_on: expiry_for(today),
            public_modulus: "c3ludGhldGljLW1vZHVsdXM=".into(),
            public_exponent: "AQAB".into(),
            private_key: None,
            signature: "c3ludGhldGljLWZpcm1h".into(),
            synthetic: true,
        }
    }
}

/// Lapse date for an authorization issued on `authorized_on`.
pub fn expiry_for(authorized_on: NaiveDate) -> NaiveDate {
    authorized_on
        .checked_add_months(Months::new(CAF_VALIDITY_MONTHS))
        .unwrap_or(NaiveDate::MAX)
}

#[cfg(feature = "formats")]
impl Caf {
    /// Load an authority-issued CAF file (`<AUTORIZACION><CAF>…`).
    ///
    /// The file format is authority-defined XML; only the authorization
    /// data block and key material are extracted.
    pub fn from_xml(xml: &str) -> Result<Self, FolioError> {
        use serde_json::Value;

        let malformed = |detail: &str| FolioError::MalformedCaf(detail.to_string());

        let value = crate::formats::decode_xml(xml)
            .map_err(|e| FolioError::MalformedCaf(e.to_string()))?;

        let root = value
            .as_object()
            .and_then(|m| m.get("AUTORIZACION"))
            .ok_or_else(|| malformed("missing AUTORIZACION root"))?;

        let at = |path: &[&str]| -> Option<String> {
            let mut current = root;
            for segment in path {
                current = current.as_object()?.get(*segment)?;
            }
            match current {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };

        let issuer: Rut = at(&["CAF", "DA", "RE"])
            .ok_or_else(|| malformed("missing issuer (DA/RE)"))?
            .parse()
            .map_err(|e: crate::core::RutError| FolioError::MalformedCaf(e.to_string()))?;

        let type_code: u16 = at(&["CAF", "DA", "TD"])
            .ok_or_else(|| malformed("missing document type (DA/TD)"))?
            .parse()
            .map_err(|_| malformed("document type (DA/TD) is not numeric"))?;

        let range_start: u64 = at(&["CAF", "DA", "RNG", "D"])
            .ok_or_else(|| malformed("missing range start (DA/RNG/D)"))?
            .parse()
            .map_err(|_| malformed("range start (DA/RNG/D) is not numeric"))?;

        let range_end: u64 = at(&["CAF", "DA", "RNG", "H"])
            .ok_or_else(|| malformed("missing range end (DA/RNG/H)"))?
            .parse()
            .map_err(|_| malformed("range end (DA/RNG/H) is not numeric"))?;

        let authorized_on = at(&["CAF", "DA", "FA"])
            .ok_or_else(|| malformed("missing authorization date (DA/FA)"))
            .and_then(|fa| {
                NaiveDate::parse_from_str(&fa, "%Y-%m-%d")
                    .map_err(|_| malformed("authorization date (DA/FA) is not YYYY-MM-DD"))
            })?;

        Ok(Self {
            issuer,
            type_code,
            range_start,
            range_end,
            authorized_on,
            expires_on: expiry_for(authorized_on),
            public_modulus: at(&["CAF", "DA", "RSAPK", "M"])
                .ok_or_else(|| malformed("missing RSA modulus (DA/RSAPK/M)"))?,
            public_exponent: at(&["CAF", "DA", "RSAPK", "E"])
                .ok_or_else(|| malformed("missing RSA exponent (DA/RSAPK/E)"))?,
            private_key: at(&["RSASK"]),
            signature: at(&["CAF", "FRMA"])
                .ok_or_else(|| malformed("missing authority signature (FRMA)"))?,
            synthetic: false,
        })
    }
}
