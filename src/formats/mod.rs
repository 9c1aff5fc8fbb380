//! Multi-format document ingestion.
//!
//! Raw input arrives as XML, JSON, YAML, or form data and normalizes to
//! the same [`CanonicalDocument`] regardless of source encoding quirks.
//! Format names resolve through a fixed table — nothing is guessed.
//!
//! # Example
//!
//! ```no_run
//! use tributo::formats;
//!
//! let doc = formats::parse("json", r#"{"Encabezado": {"IdDoc": {"TipoDTE": 33}}}"#).unwrap();
//! assert_eq!(doc.type_code(), Some(33));
//! ```

mod form;
mod json;
mod xml;
mod yaml;

pub use xml::{SII_DTE_NS, XmlWriter, decode_xml, document_to_xml};

use thiserror::Error;

use crate::core::CanonicalDocument;

/// The fixed set of accepted input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Xml,
    Json,
    Yaml,
    Form,
}

/// Accepted format names, in table order.
pub static FORMAT_NAMES: &[&str] = &["xml", "json", "yaml", "form"];

impl Format {
    /// Resolve a format name through the fixed table. Unknown names are
    /// rejected, never guessed.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "xml" => Some(Self::Xml),
            "json" => Some(Self::Json),
            "yaml" => Some(Self::Yaml),
            "form" => Some(Self::Form),
            _ => None,
        }
    }

    /// The table name of this format.
    pub fn name(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Form => "form",
        }
    }
}

/// Errors from format resolution, parsing, and XML generation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FormatError {
    /// The format name is not in the table.
    #[error("unknown format '{0}' (expected one of: xml, json, yaml, form)")]
    UnknownFormat(String),

    /// The input could not be decoded to a canonical document.
    #[error("malformed {format} input: {detail}")]
    MalformedInput {
        format: &'static str,
        detail: String,
    },

    /// XML generation failed.
    #[error("XML write error: {0}")]
    XmlWrite(String),
}

/// Parse raw input in the named format into a canonical document.
///
/// Parsers are pure functions of their input and safe to call
/// concurrently.
pub fn parse(format_name: &str, input: &str) -> Result<CanonicalDocument, FormatError> {
    let format = Format::from_name(format_name)
        .ok_or_else(|| FormatError::UnknownFormat(format_name.to_string()))?;

    match format {
        Format::Xml => xml::parse(input),
        Format::Json => json::parse(input),
        Format::Yaml => yaml::parse(input),
        Format::Form => form::parse(input),
    }
}
