//! Folio (sequential identifier) management.
//!
//! Every DTE carries a folio drawn from an authority-issued CAF range;
//! reusing one is a compliance violation. [`FolioAuthority`] owns the
//! CAF records and the durable grant log, and serializes the
//! compute-next/record-grant step per (issuer, document type) pair.

mod authority;
mod caf;
mod grant;

pub use authority::*;
pub use caf::*;
pub use grant::*;

use thiserror::Error;

use crate::core::Rut;

/// Errors from folio retrieval and the grant log.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FolioError {
    /// No usable CAF for the pair: none loaded, signing material failed
    /// verification, authorization expired, or a synthesized CAF was
    /// offered where only authority-issued ones are accepted.
    #[error("CAF unusable for {issuer} type {type_code}: {reason}")]
    CafInvalid {
        issuer: Rut,
        type_code: u16,
        reason: String,
    },

    /// The requested or computed folio falls outside every authorized range.
    #[error("folio {folio} outside authorized range [{start}, {end}] for {issuer} type {type_code}")]
    FolioExhausted {
        issuer: Rut,
        type_code: u16,
        folio: u64,
        start: u64,
        end: u64,
    },

    /// The explicit folio was already handed out for this pair.
    #[error("folio {folio} already granted for {issuer} type {type_code}")]
    AlreadyGranted {
        issuer: Rut,
        type_code: u16,
        folio: u64,
    },

    /// An authority-issued CAF file could not be read.
    #[error("malformed CAF file: {0}")]
    MalformedCaf(String),

    /// The grant log could not be read or appended.
    #[error("grant store failure: {0}")]
    Store(String),
}
