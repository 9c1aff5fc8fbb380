//! Authenticated exchange with the SII webservice.
//!
//! The gateway owns the seed → signed seed → token handshake and the
//! envelope upload protocol; the coordinator batches signed documents
//! into envelopes and records one result per envelope regardless of
//! individual failures.
//!
//! Transport detail is abstracted behind [`SiiTransport`]; the bundled
//! [`HttpTransport`] speaks the production SOAP/upload endpoints.

mod auth;
mod envelope;
mod exchange;
mod gateway;
mod transport;

pub use auth::*;
pub use envelope::*;
pub use exchange::*;
pub use gateway::*;
pub use transport::*;

use thiserror::Error;

use crate::core::{SignError, ValidationError};
use crate::formats::FormatError;

/// Errors from the SII protocol path.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SiiError {
    /// Seed retrieval, seed signing, or token exchange failed. Carries
    /// the outbound request and inbound response for audit.
    #[error("authentication failed during {stage}: {detail}")]
    AuthenticationFailed {
        stage: AuthStage,
        detail: String,
        request: String,
        response: Option<String>,
    },

    /// The envelope failed structural schema validation; nothing was
    /// sent and no token was requested.
    #[error("envelope failed schema validation with {} error(s)", .0.len())]
    Schema(Vec<ValidationError>),

    /// Transport-class failure after exhausting the retry budget. The
    /// last authority response, when one was received, is attached.
    #[error("transport failure after {attempts} attempt(s): {message}")]
    Transport {
        attempts: u32,
        message: String,
        last_response: Option<String>,
    },

    /// The authority's response carried no numeric tracking identifier.
    #[error("authority returned no numeric track id: {0}")]
    InvalidTrackingId(String),

    /// The exchange channel has no sender implementation.
    #[error("exchange channel '{0}' is not implemented")]
    NotImplemented(&'static str),

    /// The signing capability failed.
    #[error(transparent)]
    Sign(#[from] SignError),

    /// Envelope XML could not be generated.
    #[error(transparent)]
    Xml(#[from] FormatError),
}
