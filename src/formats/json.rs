use serde_json::Value;

use super::FormatError;
use crate::core::CanonicalDocument;

/// Parse a JSON document into the canonical map.
///
/// The payload may be bare, wrapped in a `DTE` key, or rooted at one of
/// the shape tags; all three resolve to the same canonical form.
pub fn parse(input: &str) -> Result<CanonicalDocument, FormatError> {
    let value: Value = serde_json::from_str(input).map_err(|e| FormatError::MalformedInput {
        format: "json",
        detail: e.to_string(),
    })?;

    CanonicalDocument::resolve(value).map_err(|e| FormatError::MalformedInput {
        format: "json",
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DocumentShape;

    #[test]
    fn parses_bare_payload() {
        let doc = parse(
            r#"{"Encabezado": {"IdDoc": {"TipoDTE": 33, "Folio": 42}}}"#,
        )
        .unwrap();
        assert_eq!(doc.shape(), DocumentShape::Standard);
        assert_eq!(doc.folio(), Some(42));
    }

    #[test]
    fn parses_shape_rooted_payload() {
        let doc = parse(
            r#"{"Exportaciones": {"Encabezado": {"IdDoc": {"TipoDTE": 110, "Folio": 3}}}}"#,
        )
        .unwrap();
        assert_eq!(doc.shape(), DocumentShape::Export);
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(
            parse("{not json"),
            Err(FormatError::MalformedInput { format: "json", .. })
        ));
    }

    #[test]
    fn rejects_non_mapping() {
        assert!(parse("[1, 2, 3]").is_err());
    }
}
