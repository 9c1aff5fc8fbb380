//! # tributo
//!
//! Chilean electronic invoicing (DTE) library covering the issuing lifecycle:
//! CAF folio management, multi-format document ingestion, normalization,
//! per-type validation, and authenticated exchange with the SII webservice.
//!
//! All monetary values use [`rust_decimal::Decimal`] — never floating point.
//! The canonical document model follows the SII DTE schema: an ordered field
//! map rooted at one of `Documento`, `Exportaciones`, or `Liquidacion`.
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_decimal_macros::dec;
//! use tributo::core::*;
//!
//! // Net/VAT split at the Chilean standard rate.
//! let normalizer = Normalizer::default();
//! assert_eq!(normalizer.split_net_vat(dec!(680), dec!(19)), (dec!(571), dec!(108)));
//!
//! // RUT check-digit verification.
//! let rut: Rut = "76192083-9".parse().unwrap();
//! assert_eq!(rut.to_string(), "76192083-9");
//!
//! // Every registered rule runs; errors accumulate.
//! let dispatch = ValidatorDispatch::standard();
//! let doc = CanonicalDocument::new(DocumentShape::Standard);
//! let errors = dispatch.validate(33, &doc).unwrap_err();
//! assert!(errors.field_errors().len() > 1);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `core` (default) | Canonical document, normalization, validation, folio/CAF management |
//! | `formats` | XML/JSON/YAML/form parsers and the DTE XML writer |
//! | `sii` | SII webservice gateway, envelopes, exchange coordinator |
//! | `all` | Everything |

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "core")]
pub mod folio;

#[cfg(feature = "formats")]
pub mod formats;

#[cfg(feature = "sii")]
pub mod sii;

// Re-export core types at crate root for convenience
#[cfg(feature = "core")]
pub use crate::core::*;
