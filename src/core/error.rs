use thiserror::Error;

/// A single validation error with field path and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dot-separated path to the invalid field (e.g. "Encabezado.Emisor.RUTEmisor").
    pub field: String,
    /// Human-readable error description.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ValidationError {
    /// Create a validation error for a field path.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Outcome of validation dispatch for one document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValidateError {
    /// No rule-set is registered for the document type code.
    #[error("no validation rule-set registered for document type {0}")]
    UnknownDocumentType(u16),

    /// One or more field-level rules failed. All rules ran; every
    /// violation is listed.
    #[error("document failed validation with {} error(s)", .0.len())]
    Invalid(Vec<ValidationError>),
}

impl ValidateError {
    /// The accumulated field-level errors, empty for [`ValidateError::UnknownDocumentType`].
    pub fn field_errors(&self) -> &[ValidationError] {
        match self {
            Self::Invalid(errors) => errors,
            _ => &[],
        }
    }
}
