use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

use super::doctype::is_known_type_code;
use super::document::CanonicalDocument;
use super::error::{ValidateError, ValidationError};
use super::rut::Rut;

/// One validation rule: inspects the document and appends zero or more
/// field-level errors. Rules never short-circuit each other.
pub type Rule = fn(&CanonicalDocument, &mut Vec<ValidationError>);

/// Routes a document to the rule-set registered for its type code.
///
/// The registry is constructed statically at startup
/// ([`ValidatorDispatch::standard`]) and may be extended with
/// [`register`](Self::register). Dispatch runs every applicable rule and
/// returns all accumulated violations at once.
pub struct ValidatorDispatch {
    rules: BTreeMap<u16, Vec<Rule>>,
}

impl ValidatorDispatch {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    /// Registry covering every electronic document type the SII accepts.
    pub fn standard() -> Self {
        let mut dispatch = Self::new();

        for code in [33u16, 46] {
            dispatch.register(
                code,
                vec![
                    require_id,
                    require_issuer,
                    require_receiver,
                    require_lines,
                    totals_affected,
                ],
            );
        }

        for code in [34u16, 41] {
            dispatch.register(
                code,
                vec![
                    require_id,
                    require_issuer,
                    require_receiver,
                    require_lines,
                    totals_exempt,
                ],
            );
        }

        dispatch.register(
            39,
            vec![require_id, require_issuer, require_lines, totals_affected],
        );

        dispatch.register(
            52,
            vec![
                require_id,
                require_issuer,
                require_receiver,
                require_lines,
                require_dispatch_indicator,
            ],
        );

        for code in [56u16, 61] {
            dispatch.register(
                code,
                vec![
                    require_id,
                    require_issuer,
                    require_receiver,
                    require_lines,
                    require_reference,
                    totals_affected,
                ],
            );
        }

        dispatch.register(
            110,
            vec![
                require_id,
                require_issuer,
                require_lines,
                require_export_transport,
            ],
        );

        for code in [111u16, 112] {
            dispatch.register(
                code,
                vec![
                    require_id,
                    require_issuer,
                    require_lines,
                    require_export_transport,
                    require_reference,
                ],
            );
        }

        dispatch.register(
            43,
            vec![require_id, require_issuer, require_receiver, require_lines],
        );

        dispatch
    }

    /// Register (or replace) the rule-set for a document type code.
    pub fn register(&mut self, type_code: u16, rules: Vec<Rule>) {
        self.rules.insert(type_code, rules);
    }

    /// Whether a rule-set is registered for the code.
    pub fn is_registered(&self, type_code: u16) -> bool {
        self.rules.contains_key(&type_code)
    }

    /// Run every rule registered for `type_code` against the document.
    ///
    /// All rules run even after the first failure, so one call surfaces
    /// every violation.
    pub fn validate(&self, type_code: u16, doc: &CanonicalDocument) -> Result<(), ValidateError> {
        let rules = self
            .rules
            .get(&type_code)
            .ok_or(ValidateError::UnknownDocumentType(type_code))?;

        let mut errors = Vec::new();
        for rule in rules {
            rule(doc, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidateError::Invalid(errors))
        }
    }
}

impl Default for ValidatorDispatch {
    fn default() -> Self {
        Self::standard()
    }
}

// --- rules ---

/// Folio, type code, and issue date.
fn require_id(doc: &CanonicalDocument, errors: &mut Vec<ValidationError>) {
    match doc.folio() {
        None => errors.push(ValidationError::new(
            "Encabezado.IdDoc.Folio",
            "folio must be present",
        )),
        Some(0) => errors.push(ValidationError::new(
            "Encabezado.IdDoc.Folio",
            "folio must be greater than zero",
        )),
        Some(_) => {}
    }

    match doc.type_code() {
        None => errors.push(ValidationError::new(
            "Encabezado.IdDoc.TipoDTE",
            "document type code must be present",
        )),
        Some(code) if !is_known_type_code(code) => errors.push(ValidationError::new(
            "Encabezado.IdDoc.TipoDTE",
            format!("'{code}' is not an electronic document type code"),
        )),
        Some(_) => {}
    }

    match doc.str_at("Encabezado.IdDoc.FchEmis") {
        None => errors.push(ValidationError::new(
            "Encabezado.IdDoc.FchEmis",
            "issue date must be present",
        )),
        Some(date) => {
            if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
                errors.push(ValidationError::new(
                    "Encabezado.IdDoc.FchEmis",
                    format!("issue date '{date}' is not in YYYY-MM-DD form"),
                ));
            }
        }
    }
}

fn require_issuer(doc: &CanonicalDocument, errors: &mut Vec<ValidationError>) {
    require_rut(doc, "Encabezado.Emisor.RUTEmisor", errors);

    if doc
        .str_at("Encabezado.Emisor.RznSoc")
        .is_none_or(|name| name.trim().is_empty())
    {
        errors.push(ValidationError::new(
            "Encabezado.Emisor.RznSoc",
            "issuer name must not be empty",
        ));
    }
}

fn require_receiver(doc: &CanonicalDocument, errors: &mut Vec<ValidationError>) {
    require_rut(doc, "Encabezado.Receptor.RUTRecep", errors);

    if doc
        .str_at("Encabezado.Receptor.RznSocRecep")
        .is_none_or(|name| name.trim().is_empty())
    {
        errors.push(ValidationError::new(
            "Encabezado.Receptor.RznSocRecep",
            "receiver name must not be empty",
        ));
    }
}

fn require_rut(doc: &CanonicalDocument, path: &str, errors: &mut Vec<ValidationError>) {
    match doc.str_at(path) {
        None => errors.push(ValidationError::new(path, "RUT must be present")),
        Some(raw) => {
            if let Err(e) = raw.parse::<Rut>() {
                errors.push(ValidationError::new(path, e.to_string()));
            }
        }
    }
}

/// At least one line item, each with an item name.
fn require_lines(doc: &CanonicalDocument, errors: &mut Vec<ValidationError>) {
    let lines: Vec<&Value> = match doc.get("Detalle") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    };

    if lines.is_empty() {
        errors.push(ValidationError::new(
            "Detalle",
            "document must have at least one line item",
        ));
        return;
    }

    for (i, line) in lines.iter().enumerate() {
        let named = line
            .as_object()
            .and_then(|l| l.get("NmbItem"))
            .and_then(Value::as_str)
            .is_some_and(|n| !n.trim().is_empty());
        if !named {
            errors.push(ValidationError::new(
                format!("Detalle[{i}].NmbItem"),
                "line item name must not be empty",
            ));
        }
    }
}

/// Affected documents: gross present; net + VAT + exempt reconcile with
/// the gross to within one peso of rounding latitude.
fn totals_affected(doc: &CanonicalDocument, errors: &mut Vec<ValidationError>) {
    let gross = match doc.decimal_at("Encabezado.Totales.MntTotal") {
        Some(gross) => gross,
        None => {
            errors.push(ValidationError::new(
                "Encabezado.Totales.MntTotal",
                "total amount must be present",
            ));
            return;
        }
    };

    let net = doc.decimal_at("Encabezado.Totales.MntNeto");
    let vat = doc.decimal_at("Encabezado.Totales.IVA");
    if let (Some(net), Some(vat)) = (net, vat) {
        let exempt = doc
            .decimal_at("Encabezado.Totales.MntExe")
            .unwrap_or(Decimal::ZERO);
        let sum = net + vat + exempt;
        if (gross - sum).abs() > dec!(1) {
            errors.push(ValidationError::new(
                "Encabezado.Totales.MntTotal",
                format!("total {gross} does not match net {net} + VAT {vat} + exempt {exempt}"),
            ));
        }
    }
}

/// Exempt documents must not carry VAT.
fn totals_exempt(doc: &CanonicalDocument, errors: &mut Vec<ValidationError>) {
    if let Some(vat) = doc.decimal_at("Encabezado.Totales.IVA") {
        if !vat.is_zero() {
            errors.push(ValidationError::new(
                "Encabezado.Totales.IVA",
                format!("exempt document must not declare VAT, got {vat}"),
            ));
        }
    }

    if doc.decimal_at("Encabezado.Totales.MntTotal").is_none() {
        errors.push(ValidationError::new(
            "Encabezado.Totales.MntTotal",
            "total amount must be present",
        ));
    }
}

/// Notas reference the document they correct.
fn require_reference(doc: &CanonicalDocument, errors: &mut Vec<ValidationError>) {
    let reference = match doc.get("Referencia") {
        Some(Value::Array(refs)) => refs.first(),
        Some(r @ Value::Object(_)) => Some(r),
        _ => None,
    };

    let Some(Value::Object(reference)) = reference else {
        errors.push(ValidationError::new(
            "Referencia",
            "nota must reference the corrected document",
        ));
        return;
    };

    for field in ["TpoDocRef", "FolioRef"] {
        if !reference.contains_key(field) {
            errors.push(ValidationError::new(
                format!("Referencia.{field}"),
                format!("{field} must be present in the reference"),
            ));
        }
    }
}

/// Dispatch guides declare why goods move.
fn require_dispatch_indicator(doc: &CanonicalDocument, errors: &mut Vec<ValidationError>) {
    if doc.u64_at("Encabezado.IdDoc.IndTraslado").is_none() {
        errors.push(ValidationError::new(
            "Encabezado.IdDoc.IndTraslado",
            "dispatch guide must declare a transfer indicator",
        ));
    }
}

/// Export documents declare destination/transport data.
fn require_export_transport(doc: &CanonicalDocument, errors: &mut Vec<ValidationError>) {
    if !matches!(doc.get("Encabezado.Transporte"), Some(Value::Object(_))) {
        errors.push(ValidationError::new(
            "Encabezado.Transporte",
            "export document must declare transport and destination data",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice() -> CanonicalDocument {
        CanonicalDocument::resolve(json!({
            "Encabezado": {
                "IdDoc": { "TipoDTE": 33, "Folio": 42, "FchEmis": "2026-03-01" },
                "Emisor": { "RUTEmisor": "76192083-9", "RznSoc": "Emisora SpA" },
                "Receptor": { "RUTRecep": "66666666-6", "RznSocRecep": "Cliente Ltda" },
                "Totales": { "MntNeto": 1000, "IVA": 190, "MntTotal": 1190 }
            },
            "Detalle": [ { "NmbItem": "Servicio", "MontoItem": 1190 } ]
        }))
        .unwrap()
    }

    #[test]
    fn valid_invoice_passes() {
        let dispatch = ValidatorDispatch::standard();
        assert!(dispatch.validate(33, &invoice()).is_ok());
    }

    #[test]
    fn unknown_type_code() {
        let dispatch = ValidatorDispatch::standard();
        assert!(matches!(
            dispatch.validate(30, &invoice()),
            Err(ValidateError::UnknownDocumentType(30))
        ));
    }

    #[test]
    fn errors_accumulate_across_rules() {
        let doc = CanonicalDocument::resolve(json!({
            "Encabezado": {
                "IdDoc": { "TipoDTE": 33 },
                "Emisor": { "RUTEmisor": "76192083-1" }
            }
        }))
        .unwrap();

        let dispatch = ValidatorDispatch::standard();
        let err = dispatch.validate(33, &doc).unwrap_err();
        let fields: Vec<&str> = err.field_errors().iter().map(|e| e.field.as_str()).collect();

        // folio, issue date, bad issuer check digit, issuer name, receiver
        // RUT, receiver name, lines, totals — all surfaced in one pass.
        assert!(fields.contains(&"Encabezado.IdDoc.Folio"));
        assert!(fields.contains(&"Encabezado.IdDoc.FchEmis"));
        assert!(fields.contains(&"Encabezado.Emisor.RUTEmisor"));
        assert!(fields.contains(&"Detalle"));
        assert!(fields.contains(&"Encabezado.Totales.MntTotal"));
        assert!(fields.len() >= 6);
    }

    #[test]
    fn totals_mismatch_detected() {
        let mut doc = invoice();
        doc.set("Encabezado.Totales.MntTotal", json!(1300));
        let dispatch = ValidatorDispatch::standard();
        let err = dispatch.validate(33, &doc).unwrap_err();
        assert!(
            err.field_errors()
                .iter()
                .any(|e| e.field == "Encabezado.Totales.MntTotal")
        );
    }

    #[test]
    fn rounding_latitude_of_one_peso() {
        let mut doc = invoice();
        // 571 + 108 = 679 against a gross of 680: within latitude.
        doc.set("Encabezado.Totales.MntNeto", json!(571));
        doc.set("Encabezado.Totales.IVA", json!(108));
        doc.set("Encabezado.Totales.MntTotal", json!(680));
        let dispatch = ValidatorDispatch::standard();
        assert!(dispatch.validate(33, &doc).is_ok());
    }

    #[test]
    fn credit_note_requires_reference() {
        let mut doc = invoice();
        doc.set("Encabezado.IdDoc.TipoDTE", json!(61));
        let dispatch = ValidatorDispatch::standard();
        let err = dispatch.validate(61, &doc).unwrap_err();
        assert!(err.field_errors().iter().any(|e| e.field == "Referencia"));

        doc.set("Referencia", json!({ "TpoDocRef": 33, "FolioRef": 42 }));
        assert!(dispatch.validate(61, &doc).is_ok());
    }

    #[test]
    fn exempt_invoice_rejects_vat() {
        let doc = CanonicalDocument::resolve(json!({
            "Encabezado": {
                "IdDoc": { "TipoDTE": 34, "Folio": 8, "FchEmis": "2026-03-01" },
                "Emisor": { "RUTEmisor": "76192083-9", "RznSoc": "Emisora SpA" },
                "Receptor": { "RUTRecep": "66666666-6", "RznSocRecep": "Cliente Ltda" },
                "Totales": { "MntExe": 5000, "IVA": 950, "MntTotal": 5000 }
            },
            "Detalle": [ { "NmbItem": "Capacitación", "MontoItem": 5000 } ]
        }))
        .unwrap();

        let dispatch = ValidatorDispatch::standard();
        let err = dispatch.validate(34, &doc).unwrap_err();
        assert!(
            err.field_errors()
                .iter()
                .any(|e| e.field == "Encabezado.Totales.IVA")
        );
    }

    #[test]
    fn export_invoice_requires_transport() {
        let doc = CanonicalDocument::resolve(json!({
            "Encabezado": {
                "IdDoc": { "TipoDTE": 110, "Folio": 3, "FchEmis": "2026-03-01" },
                "Emisor": { "RUTEmisor": "76192083-9", "RznSoc": "Exportadora SpA" }
            },
            "Detalle": [ { "NmbItem": "Vino embotellado", "MontoItem": 12000 } ]
        }))
        .unwrap();

        let dispatch = ValidatorDispatch::standard();
        let err = dispatch.validate(110, &doc).unwrap_err();
        assert!(
            err.field_errors()
                .iter()
                .any(|e| e.field == "Encabezado.Transporte")
        );
    }
}
