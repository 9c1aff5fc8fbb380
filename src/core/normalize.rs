use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde_json::{Map, Number, Value};

use super::document::CanonicalDocument;
use super::rut::GENERIC_RUT;

/// One logical party field: the canonical SII name, the ordered list of
/// historical source aliases probed for it, and the fallback when none
/// is present.
struct FieldAlias {
    canonical: &'static str,
    sources: &'static [&'static str],
    default: Option<&'static str>,
}

/// Issuer (Emisor) field aliases, probed in order.
static ISSUER_ALIASES: &[FieldAlias] = &[
    FieldAlias {
        canonical: "RUTEmisor",
        sources: &["RUTEmisor", "RUTEmis", "RutEmisor", "rut"],
        default: None,
    },
    FieldAlias {
        canonical: "RznSoc",
        sources: &["RznSoc", "RznSocEmisor", "RazonSocial", "razon_social"],
        default: None,
    },
    FieldAlias {
        canonical: "GiroEmis",
        sources: &["GiroEmis", "GiroEmisor", "Giro"],
        default: None,
    },
    FieldAlias {
        canonical: "Telefono",
        sources: &["Telefono", "Fono"],
        default: None,
    },
    FieldAlias {
        canonical: "CorreoEmisor",
        sources: &["CorreoEmisor", "Correo", "Email"],
        default: None,
    },
    FieldAlias {
        canonical: "DirOrigen",
        sources: &["DirOrigen", "Direccion"],
        default: None,
    },
    FieldAlias {
        canonical: "CmnaOrigen",
        sources: &["CmnaOrigen", "Comuna"],
        default: None,
    },
    FieldAlias {
        canonical: "CiudadOrigen",
        sources: &["CiudadOrigen", "Ciudad"],
        default: None,
    },
];

/// Receiver (Receptor) field aliases. The identifier falls back to the
/// fixed placeholder RUT; everything else defaults to null.
static RECEIVER_ALIASES: &[FieldAlias] = &[
    FieldAlias {
        canonical: "RUTRecep",
        sources: &["RUTRecep", "RUTRecept", "RutReceptor", "rut"],
        default: Some(GENERIC_RUT),
    },
    FieldAlias {
        canonical: "RznSocRecep",
        sources: &["RznSocRecep", "RznSocRecept", "RznSoc", "RazonSocial"],
        default: None,
    },
    FieldAlias {
        canonical: "GiroRecep",
        sources: &["GiroRecep", "GiroRecept", "Giro"],
        default: None,
    },
    FieldAlias {
        canonical: "Contacto",
        sources: &["Contacto", "Telefono", "Fono"],
        default: None,
    },
    FieldAlias {
        canonical: "CorreoRecep",
        sources: &["CorreoRecep", "Correo", "Email"],
        default: None,
    },
    FieldAlias {
        canonical: "DirRecep",
        sources: &["DirRecep", "Direccion"],
        default: None,
    },
    FieldAlias {
        canonical: "CmnaRecep",
        sources: &["CmnaRecep", "Comuna"],
        default: None,
    },
    FieldAlias {
        canonical: "CiudadRecep",
        sources: &["CiudadRecep", "Ciudad"],
        default: None,
    },
];

/// Monetary fields in `Encabezado.Totales` subject to currency rounding.
static TOTAL_FIELDS: &[&str] = &[
    "MntNeto",
    "MntExe",
    "IVA",
    "MntTotal",
    "MntNF",
    "MontoPeriodo",
    "SaldoAnterior",
    "VlrPagar",
];

/// Cleans and derives computed fields on a canonical document.
///
/// Normalization is pure and idempotent: applying it twice yields the
/// same document as applying it once.
#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Currency treated as the home currency (amounts round to whole
    /// units). Documents with no declared currency are assumed home.
    pub home_currency: String,
    /// Fractional digits kept for any other declared currency.
    pub foreign_decimals: u32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            home_currency: "CLP".into(),
            foreign_decimals: 4,
        }
    }
}

impl Normalizer {
    pub fn new(home_currency: impl Into<String>, foreign_decimals: u32) -> Self {
        Self {
            home_currency: home_currency.into(),
            foreign_decimals,
        }
    }

    /// Normalize a canonical document: party field aliasing, activity-code
    /// coercion, currency rounding, and net/VAT derivation.
    pub fn normalize(&self, mut doc: CanonicalDocument) -> CanonicalDocument {
        self.normalize_party(&mut doc, "Encabezado.Emisor", ISSUER_ALIASES, false);
        self.normalize_party(&mut doc, "Encabezado.Receptor", RECEIVER_ALIASES, true);
        self.coerce_activity_code(&mut doc);
        self.normalize_totals(&mut doc);
        doc
    }

    /// Split a gross total into (net, VAT) at the given percentage rate.
    ///
    /// `net = round(gross / (1 + rate/100))`, `vat = round(net * rate/100)`.
    /// A rate of zero (exempt) yields `(0, 0)`.
    ///
    /// The two roundings are independent, so net + VAT does not always
    /// reproduce the gross: `split_net_vat(680, 19)` gives net 571 and
    /// VAT 108, which sum to 679. That is the authority's arithmetic and
    /// is intentionally left as-is.
    pub fn split_net_vat(&self, gross: Decimal, rate: Decimal) -> (Decimal, Decimal) {
        self.split_net_vat_dp(gross, rate, 0)
    }

    fn split_net_vat_dp(&self, gross: Decimal, rate: Decimal, dp: u32) -> (Decimal, Decimal) {
        if rate.is_zero() {
            return (Decimal::ZERO, Decimal::ZERO);
        }
        let net = round_half_up(gross / (Decimal::ONE + rate / dec!(100)), dp);
        let vat = round_half_up(net * rate / dec!(100), dp);
        (net, vat)
    }

    fn is_home_currency(&self, doc: &CanonicalDocument) -> bool {
        match doc.str_at("Encabezado.Totales.TpoMoneda") {
            None => true,
            Some(currency) => currency == self.home_currency,
        }
    }

    /// Probe the alias list for each logical field and rebuild the party
    /// map with canonical names first, unrecognized fields after.
    fn normalize_party(
        &self,
        doc: &mut CanonicalDocument,
        path: &str,
        aliases: &[FieldAlias],
        create_if_missing: bool,
    ) {
        let existing = match doc.get(path) {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => Map::new(),
            None if create_if_missing => Map::new(),
            None => return,
        };

        let mut normalized = Map::new();
        let mut consumed: Vec<&str> = Vec::new();

        for alias in aliases {
            let mut found = None;
            for source in alias.sources {
                if let Some(value) = existing.get(*source) {
                    if !matches!(value, Value::Null) {
                        found = Some(value.clone());
                        consumed.push(source);
                        break;
                    }
                }
            }
            let value = match (found, alias.default) {
                (Some(v), _) => v,
                (None, Some(default)) => Value::String(default.to_string()),
                (None, None) => Value::Null,
            };
            normalized.insert(alias.canonical.to_string(), value);
        }

        // Carry over anything the alias table does not cover.
        for (key, value) in existing {
            if !normalized.contains_key(&key) && !consumed.contains(&key.as_str()) {
                normalized.insert(key, value);
            }
        }

        doc.set(path, Value::Object(normalized));
    }

    /// `Acteco` coerces to an integer or null.
    fn coerce_activity_code(&self, doc: &mut CanonicalDocument) {
        let path = "Encabezado.Emisor.Acteco";
        let coerced = match doc.get(path) {
            None => return,
            Some(Value::Number(n)) if n.is_u64() => return,
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(|n| Value::Number(Number::from(n)))
                .unwrap_or(Value::Null),
            Some(_) => Value::Null,
        };
        doc.set(path, coerced);
    }

    fn normalize_totals(&self, doc: &mut CanonicalDocument) {
        let dp = if self.is_home_currency(doc) {
            0
        } else {
            self.foreign_decimals
        };

        // Derive net/VAT from the gross when only the gross is present.
        let gross = doc.decimal_at("Encabezado.Totales.MntTotal");
        let has_net = doc.get("Encabezado.Totales.MntNeto").is_some();
        let has_vat = doc.get("Encabezado.Totales.IVA").is_some();
        if let Some(gross) = gross {
            if !has_net && !has_vat {
                let rate = doc
                    .decimal_at("Encabezado.Totales.TasaIVA")
                    .unwrap_or(Decimal::ZERO);
                if rate.is_zero() {
                    // Exempt: net and VAT are zero, the gross is exempt amount.
                    doc.set("Encabezado.Totales.MntNeto", amount_value(Decimal::ZERO, dp));
                    doc.set("Encabezado.Totales.IVA", amount_value(Decimal::ZERO, dp));
                    if doc.get("Encabezado.Totales.MntExe").is_none() {
                        doc.set("Encabezado.Totales.MntExe", amount_value(gross, dp));
                    }
                } else {
                    let exempt = doc
                        .decimal_at("Encabezado.Totales.MntExe")
                        .unwrap_or(Decimal::ZERO);
                    let (net, vat) = self.split_net_vat_dp(gross - exempt, rate, dp);
                    doc.set("Encabezado.Totales.MntNeto", amount_value(net, dp));
                    doc.set("Encabezado.Totales.IVA", amount_value(vat, dp));
                }
            }
        }

        // Round every monetary total to the currency's scale.
        for field in TOTAL_FIELDS {
            let path = format!("Encabezado.Totales.{field}");
            if let Some(amount) = doc.decimal_at(&path) {
                doc.set(&path, amount_value(amount, dp));
            }
        }

        self.round_line_amounts(doc, dp);
    }

    /// Round `Detalle[].MontoItem`. `Detalle` may be a single mapping or a
    /// sequence, depending on the source format.
    fn round_line_amounts(&self, doc: &mut CanonicalDocument, dp: u32) {
        let rounded = |item: &mut Value| {
            if let Value::Object(line) = item {
                let amount = line.get("MontoItem").and_then(decimal_of);
                if let Some(amount) = amount {
                    line.insert("MontoItem".to_string(), amount_value(amount, dp));
                }
            }
        };

        if let Some(detalle) = doc.fields_mut().get_mut("Detalle") {
            match detalle {
                Value::Array(items) => items.iter_mut().for_each(rounded),
                item @ Value::Object(_) => rounded(item),
                _ => {}
            }
        }
    }
}

/// Round half away from zero (commercial rounding).
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
}

/// Render a rounded amount as a canonical map value: whole-unit amounts
/// become integers, fractional amounts decimal strings (floats never
/// enter the map).
fn amount_value(amount: Decimal, dp: u32) -> Value {
    let rounded = round_half_up(amount, dp).normalize();
    match rounded.to_i64() {
        Some(n) if rounded.fract().is_zero() => Value::Number(Number::from(n)),
        _ => Value::String(rounded.to_string()),
    }
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
