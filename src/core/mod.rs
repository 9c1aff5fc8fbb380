//! Core DTE types, normalization, and validation dispatch.
//!
//! This module provides the canonical document model shared by every
//! ingestion format, plus the RUT and document-type code tables the SII
//! schema is built around.

mod doctype;
mod document;
mod error;
mod normalize;
mod rut;
mod sign;
mod validation;

pub use doctype::*;
pub use document::*;
pub use error::*;
pub use normalize::*;
pub use rut::*;
pub use sign::*;
pub use validation::*;
