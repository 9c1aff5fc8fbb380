use serde::{Deserialize, Serialize};

use super::document::DocumentShape;

/// SII electronic document type codes (Tipo de DTE).
///
/// Only the electronic document family is listed — paper document codes
/// are not accepted by the issuing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum DteType {
    /// 33 — Factura electrónica.
    Invoice = 33,
    /// 34 — Factura no afecta o exenta electrónica.
    InvoiceExempt = 34,
    /// 39 — Boleta electrónica.
    Receipt = 39,
    /// 41 — Boleta no afecta o exenta electrónica.
    ReceiptExempt = 41,
    /// 43 — Liquidación factura electrónica.
    Settlement = 43,
    /// 46 — Factura de compra electrónica.
    PurchaseInvoice = 46,
    /// 52 — Guía de despacho electrónica.
    DispatchGuide = 52,
    /// 56 — Nota de débito electrónica.
    DebitNote = 56,
    /// 61 — Nota de crédito electrónica.
    CreditNote = 61,
    /// 110 — Factura de exportación electrónica.
    ExportInvoice = 110,
    /// 111 — Nota de débito de exportación electrónica.
    ExportDebitNote = 111,
    /// 112 — Nota de crédito de exportación electrónica.
    ExportCreditNote = 112,
}

/// All electronic document type codes, sorted.
pub static DTE_TYPE_CODES: &[u16] = &[33, 34, 39, 41, 43, 46, 52, 56, 61, 110, 111, 112];

impl DteType {
    /// Resolve a numeric SII code, `None` for anything outside the table.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            33 => Some(Self::Invoice),
            34 => Some(Self::InvoiceExempt),
            39 => Some(Self::Receipt),
            41 => Some(Self::ReceiptExempt),
            43 => Some(Self::Settlement),
            46 => Some(Self::PurchaseInvoice),
            52 => Some(Self::DispatchGuide),
            56 => Some(Self::DebitNote),
            61 => Some(Self::CreditNote),
            110 => Some(Self::ExportInvoice),
            111 => Some(Self::ExportDebitNote),
            112 => Some(Self::ExportCreditNote),
            _ => None,
        }
    }

    /// The numeric SII code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Official document name (Spanish, as in the SII catalog).
    pub fn name(self) -> &'static str {
        match self {
            Self::Invoice => "Factura electrónica",
            Self::InvoiceExempt => "Factura no afecta o exenta electrónica",
            Self::Receipt => "Boleta electrónica",
            Self::ReceiptExempt => "Boleta no afecta o exenta electrónica",
            Self::Settlement => "Liquidación factura electrónica",
            Self::PurchaseInvoice => "Factura de compra electrónica",
            Self::DispatchGuide => "Guía de despacho electrónica",
            Self::DebitNote => "Nota de débito electrónica",
            Self::CreditNote => "Nota de crédito electrónica",
            Self::ExportInvoice => "Factura de exportación electrónica",
            Self::ExportDebitNote => "Nota de débito de exportación electrónica",
            Self::ExportCreditNote => "Nota de crédito de exportación electrónica",
        }
    }

    /// Whether the document type carries no VAT (documento exento).
    pub fn is_exempt(self) -> bool {
        matches!(self, Self::InvoiceExempt | Self::ReceiptExempt)
    }

    /// Whether the document belongs to the export family.
    pub fn is_export(self) -> bool {
        matches!(
            self,
            Self::ExportInvoice | Self::ExportDebitNote | Self::ExportCreditNote
        )
    }

    /// Whether the document references another document (notas).
    pub fn requires_reference(self) -> bool {
        matches!(
            self,
            Self::DebitNote | Self::CreditNote | Self::ExportDebitNote | Self::ExportCreditNote
        )
    }

    /// The canonical root shape this type serializes under.
    pub fn shape(self) -> DocumentShape {
        if self.is_export() {
            DocumentShape::Export
        } else if self == Self::Settlement {
            DocumentShape::Settlement
        } else {
            DocumentShape::Standard
        }
    }
}

/// Check whether `code` is a known electronic document type code.
pub fn is_known_type_code(code: u16) -> bool {
    DTE_TYPE_CODES.binary_search(&code).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for &code in DTE_TYPE_CODES {
            assert_eq!(DteType::from_code(code).unwrap().code(), code);
        }
    }

    #[test]
    fn unknown_codes_rejected() {
        assert!(DteType::from_code(30).is_none()); // paper factura
        assert!(DteType::from_code(0).is_none());
        assert!(!is_known_type_code(30));
    }

    #[test]
    fn shapes() {
        assert_eq!(DteType::Invoice.shape(), DocumentShape::Standard);
        assert_eq!(DteType::ExportInvoice.shape(), DocumentShape::Export);
        assert_eq!(DteType::Settlement.shape(), DocumentShape::Settlement);
    }

    #[test]
    fn exempt_and_export_flags() {
        assert!(DteType::InvoiceExempt.is_exempt());
        assert!(!DteType::Invoice.is_exempt());
        assert!(DteType::ExportCreditNote.is_export());
        assert!(DteType::CreditNote.requires_reference());
        assert!(!DteType::Receipt.requires_reference());
    }
}
