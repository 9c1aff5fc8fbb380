use serde_json::{Number, Value};

use super::FormatError;
use crate::core::{CanonicalDocument, DocumentShape};

/// Fixed lookup from user-facing form field names to canonical paths.
/// Fields not in the table are dropped, not errored.
static FORM_FIELDS: &[(&str, &str)] = &[
    ("dte", "Encabezado.IdDoc.TipoDTE"),
    ("folio", "Encabezado.IdDoc.Folio"),
    ("fecha_emision", "Encabezado.IdDoc.FchEmis"),
    ("fecha_vencimiento", "Encabezado.IdDoc.FchVenc"),
    ("rut_emisor", "Encabezado.Emisor.RUTEmisor"),
    ("razon_social_emisor", "Encabezado.Emisor.RznSoc"),
    ("giro_emisor", "Encabezado.Emisor.GiroEmis"),
    ("direccion_emisor", "Encabezado.Emisor.DirOrigen"),
    ("comuna_emisor", "Encabezado.Emisor.CmnaOrigen"),
    ("rut_receptor", "Encabezado.Receptor.RUTRecep"),
    ("razon_social_receptor", "Encabezado.Receptor.RznSocRecep"),
    ("giro_receptor", "Encabezado.Receptor.GiroRecep"),
    ("direccion_receptor", "Encabezado.Receptor.DirRecep"),
    ("comuna_receptor", "Encabezado.Receptor.CmnaRecep"),
    ("correo_receptor", "Encabezado.Receptor.CorreoRecep"),
    ("monto_neto", "Encabezado.Totales.MntNeto"),
    ("monto_exento", "Encabezado.Totales.MntExe"),
    ("iva", "Encabezado.Totales.IVA"),
    ("tasa_iva", "Encabezado.Totales.TasaIVA"),
    ("monto_total", "Encabezado.Totales.MntTotal"),
    ("moneda", "Encabezado.Totales.TpoMoneda"),
];

/// Parse urlencoded form data (`key=value&…`) into the canonical map.
///
/// User-facing field names remap to canonical paths through
/// [`FORM_FIELDS`]; unknown keys are silently dropped.
pub fn parse(input: &str) -> Result<CanonicalDocument, FormatError> {
    let mut doc = CanonicalDocument::new(DocumentShape::Standard);

    for (key, value) in form_urlencoded::parse(input.trim().as_bytes()) {
        let Some((_, path)) = FORM_FIELDS.iter().find(|(name, _)| *name == key) else {
            continue;
        };
        doc.set(path, field_value(&value));
    }

    // Re-resolve so export/settlement type codes land in the right shape.
    CanonicalDocument::resolve(Value::Object(doc.into_fields())).map_err(|e| {
        FormatError::MalformedInput {
            format: "form",
            detail: e.to_string(),
        }
    })
}

/// Digit-only values coerce to integers, mirroring the XML decoder.
fn field_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let looks_numeric = !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit())
        && !(body.len() > 1 && body.starts_with('0'));

    if looks_numeric {
        if let Ok(n) = trimmed.parse::<i64>() {
            return Value::Number(Number::from(n));
        }
    }
    Value::String(trimmed.to_string())
}
