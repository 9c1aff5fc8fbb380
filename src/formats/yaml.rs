use serde_json::{Map, Number, Value};

use super::FormatError;
use crate::core::CanonicalDocument;

fn malformed(detail: impl Into<String>) -> FormatError {
    FormatError::MalformedInput {
        format: "yaml",
        detail: detail.into(),
    }
}

/// Parse a YAML document into the canonical map.
pub fn parse(input: &str) -> Result<CanonicalDocument, FormatError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(input).map_err(|e| malformed(e.to_string()))?;

    let value = to_json(value)?;
    CanonicalDocument::resolve(value).map_err(|e| malformed(e.to_string()))
}

/// Convert a YAML value to an ordered JSON value. Mapping keys must be
/// strings; YAML tags are unwrapped.
fn to_json(value: serde_yaml::Value) -> Result<Value, FormatError> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::Number(Number::from(u))
            } else if let Some(i) = n.as_i64() {
                Value::Number(Number::from(i))
            } else {
                let f = n.as_f64().unwrap_or_default();
                Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| malformed(format!("non-finite number {n:?}")))?
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => {
            Value::Array(items.into_iter().map(to_json).collect::<Result<_, _>>()?)
        }
        Yaml::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    other => return Err(malformed(format!("non-string mapping key {other:?}"))),
                };
                map.insert(key, to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => to_json(tagged.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DocumentShape;

    #[test]
    fn parses_payload() {
        let doc = parse(
            "Encabezado:\n  IdDoc:\n    TipoDTE: 39\n    Folio: 12\n  Receptor:\n    RznSocRecep: Cliente\n",
        )
        .unwrap();
        assert_eq!(doc.shape(), DocumentShape::Standard);
        assert_eq!(doc.type_code(), Some(39));
        assert_eq!(doc.folio(), Some(12));
    }

    #[test]
    fn rejects_non_string_keys() {
        assert!(parse("1: x\n2: y\n").is_err());
    }

    #[test]
    fn rejects_invalid_yaml() {
        assert!(matches!(
            parse(":\n  - ]["),
            Err(FormatError::MalformedInput { format: "yaml", .. })
        ));
    }
}
