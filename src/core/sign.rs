use thiserror::Error;

/// Error raised by a signing capability.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SignError {
    /// The signing certificate is missing, expired, or unreadable.
    #[error("signing certificate unavailable: {0}")]
    Certificate(String),

    /// The XML node could not be signed.
    #[error("XML signature failed: {0}")]
    Signature(String),
}

/// XML digital-signature capability.
///
/// Signature generation is an external concern: implementations wrap a
/// certificate store or HSM. The library only consumes the capability —
/// documents after folio assignment, envelope bodies before upload, and
/// the authentication seed during the token handshake.
pub trait XmlSigner: Send + Sync {
    /// RUT of the certificate holder, in canonical `NNNNNNNN-D` form.
    /// Used as the cache key for authentication sessions.
    fn identity(&self) -> &str;

    /// Sign `xml`, returning the document with an enveloped signature
    /// over the node identified by `reference`. An empty reference signs
    /// the document root.
    fn sign(&self, xml: &str, reference: &str) -> Result<String, SignError>;
}
