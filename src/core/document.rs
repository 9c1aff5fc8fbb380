use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::doctype::DteType;

/// The three legal root shapes of a canonical DTE.
///
/// Exactly one is present per document; the outer `DTE` envelope tag and
/// any attribute metadata are stripped during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentShape {
    /// `Documento` — facturas, boletas, guías, notas.
    Standard,
    /// `Exportaciones` — export invoices and their notas.
    Export,
    /// `Liquidacion` — liquidación factura.
    Settlement,
}

/// Root tags, in the order they are probed inside the envelope.
pub static SHAPE_TAGS: &[&str] = &["Documento", "Exportaciones", "Liquidacion"];

impl DocumentShape {
    /// The XML/JSON tag this shape is rooted under.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Standard => "Documento",
            Self::Export => "Exportaciones",
            Self::Settlement => "Liquidacion",
        }
    }

    /// Resolve a root tag to a shape.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Documento" => Some(Self::Standard),
            "Exportaciones" => Some(Self::Export),
            "Liquidacion" => Some(Self::Settlement),
            _ => None,
        }
    }
}

/// Error resolving raw decoded input into a canonical document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShapeError {
    #[error("input did not decode to a field mapping")]
    NotAMapping,
}

/// Canonical DTE document: one shape plus an ordered field map.
///
/// Field values are strings, numbers, or nested mappings, addressed by
/// dot-separated paths following the SII schema
/// (`Encabezado.IdDoc.TipoDTE`, `Encabezado.Totales.MntTotal`, …).
/// Sources that deliver numbers as text (XML, form data) are handled by
/// the coercing accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    shape: DocumentShape,
    fields: Map<String, Value>,
}

impl CanonicalDocument {
    /// Empty document of the given shape.
    pub fn new(shape: DocumentShape) -> Self {
        Self {
            shape,
            fields: Map::new(),
        }
    }

    /// Wrap an already-shaped field map.
    pub fn from_fields(shape: DocumentShape, fields: Map<String, Value>) -> Self {
        Self { shape, fields }
    }

    /// Resolve a decoded mapping into a canonical document.
    ///
    /// A single `DTE` root key is unwrapped first; a single shape-tag root
    /// key (`Documento`/`Exportaciones`/`Liquidacion`) determines the
    /// shape. A bare payload map falls back to the shape implied by
    /// `Encabezado.IdDoc.TipoDTE`, defaulting to [`DocumentShape::Standard`].
    pub fn resolve(value: Value) -> Result<Self, ShapeError> {
        let mut map = match value {
            Value::Object(map) => map,
            _ => return Err(ShapeError::NotAMapping),
        };

        // Unwrap the envelope tag if present.
        if map.len() == 1 && map.contains_key("DTE") {
            match map.remove("DTE") {
                Some(Value::Object(inner)) => map = inner,
                _ => return Err(ShapeError::NotAMapping),
            }
        }

        // A single shape-tag root fixes the shape directly.
        if map.len() == 1 {
            let tag = map.keys().next().cloned().unwrap_or_default();
            if let Some(shape) = DocumentShape::from_tag(&tag) {
                return match map.remove(&tag) {
                    Some(Value::Object(fields)) => Ok(Self { shape, fields }),
                    _ => Err(ShapeError::NotAMapping),
                };
            }
        }

        let doc = Self {
            shape: DocumentShape::Standard,
            fields: map,
        };
        let shape = doc
            .type_code()
            .and_then(DteType::from_code)
            .map(DteType::shape)
            .unwrap_or(DocumentShape::Standard);

        Ok(Self { shape, ..doc })
    }

    /// The resolved root shape.
    pub fn shape(&self) -> DocumentShape {
        self.shape
    }

    /// The ordered field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Mutable access to the field map.
    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    /// Consume into the field map.
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Value at a dot-separated path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self.fields.get(path.split('.').next()?)?;
        for segment in path.split('.').skip(1) {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Set a value at a dot-separated path, creating intermediate maps.
    /// Replaces any non-mapping value found along the way.
    pub fn set(&mut self, path: &str, value: Value) {
        fn insert(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
            match segments {
                [] => {}
                [last] => {
                    map.insert((*last).to_string(), value);
                }
                [head, rest @ ..] => {
                    let entry = map
                        .entry((*head).to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !entry.is_object() {
                        *entry = Value::Object(Map::new());
                    }
                    if let Value::Object(inner) = entry {
                        insert(inner, rest, value);
                    }
                }
            }
        }

        let segments: Vec<&str> = path.split('.').collect();
        insert(&mut self.fields, &segments, value);
    }

    /// Remove a value at a dot-separated path, returning it.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = &mut self.fields;
        for segment in &segments[..segments.len() - 1] {
            current = current.get_mut(*segment)?.as_object_mut()?;
        }
        current.remove(*segments.last()?)
    }

    /// String at a path; numbers render to their text form.
    pub fn str_at(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Unsigned integer at a path, coercing numeric strings.
    pub fn u64_at(&self, path: &str) -> Option<u64> {
        match self.get(path)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Decimal amount at a path, coercing numeric strings.
    pub fn decimal_at(&self, path: &str) -> Option<Decimal> {
        match self.get(path)? {
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            Value::String(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }

    /// `Encabezado.IdDoc.TipoDTE`, when present.
    pub fn type_code(&self) -> Option<u16> {
        self.u64_at("Encabezado.IdDoc.TipoDTE")
            .and_then(|c| u16::try_from(c).ok())
    }

    /// `Encabezado.IdDoc.Folio`, when present.
    pub fn folio(&self) -> Option<u64> {
        self.u64_at("Encabezado.IdDoc.Folio")
    }
}
