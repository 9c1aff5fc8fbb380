use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::{Rut, ValidationError, is_known_type_code};
use crate::formats::{FormatError, XmlWriter};

/// Lifecycle of one transmission unit.
///
/// `Pending → Sent → {Acknowledged, Rejected, TransportFailed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeStatus {
    /// Built, not yet handed to a sender.
    Pending,
    /// A send attempt started.
    Sent,
    /// The authority accepted the envelope and assigned a track id.
    Acknowledged,
    /// Refused before or by the authority; permanent until the input
    /// changes.
    Rejected,
    /// Transport-class failure after exhausting the retry budget.
    TransportFailed,
}

impl EnvelopeStatus {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: EnvelopeStatus) -> bool {
        use EnvelopeStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Sent, Acknowledged) | (Sent, Rejected) | (Sent, TransportFailed)
        )
    }
}

/// Envelope cover data (carátula): who issues, who transmits, and the
/// SII resolution that authorizes electronic issuing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caratula {
    /// Issuing company.
    pub issuer: Rut,
    /// Certificate holder transmitting on the company's behalf.
    pub sender: Rut,
    /// Destination; the SII itself for issuing envelopes.
    pub receiver: Rut,
    /// Date of the authorizing resolution.
    pub resolution_date: Option<NaiveDate>,
    /// Number of the authorizing resolution.
    pub resolution_number: Option<u32>,
}

impl Caratula {
    /// Carátula addressed to the SII.
    pub fn to_sii(
        issuer: Rut,
        sender: Rut,
        resolution_date: NaiveDate,
        resolution_number: u32,
    ) -> Self {
        Self {
            issuer,
            sender,
            receiver: Rut::sii(),
            resolution_date: Some(resolution_date),
            resolution_number: Some(resolution_number),
        }
    }
}

/// Transmission channel an envelope is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Upload to the tax authority.
    Sii,
    /// Direct interchange with the counterparty (no sender implemented).
    Email,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sii => "sii",
            Self::Email => "email",
        }
    }
}

/// A signed DTE ready for transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedDocument {
    pub type_code: u16,
    pub folio: u64,
    /// Signed `<DTE>…</DTE>` body, declaration stripped when embedded
    /// into an envelope.
    pub xml: String,
}

/// Per-document outcome inside an [`ExchangeResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub type_code: u16,
    pub folio: u64,
    pub status: EnvelopeStatus,
}

/// Outcome of one envelope send attempt.
///
/// Created once per attempt and never mutated afterwards; attempts
/// append to the owning envelope's result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeResult {
    pub status: EnvelopeStatus,
    /// Authority-assigned tracking identifier, on acknowledgement.
    pub track_id: Option<u64>,
    pub documents: Vec<DocumentStatus>,
    /// Failure detail naming the specific cause, empty on success.
    pub detail: Option<String>,
}

impl ExchangeResult {
    fn with_documents(
        documents: &[SignedDocument],
        status: EnvelopeStatus,
        track_id: Option<u64>,
        detail: Option<String>,
    ) -> Self {
        Self {
            status,
            track_id,
            documents: documents
                .iter()
                .map(|doc| DocumentStatus {
                    type_code: doc.type_code,
                    folio: doc.folio,
                    status,
                })
                .collect(),
            detail,
        }
    }

    pub fn acknowledged(documents: &[SignedDocument], track_id: u64) -> Self {
        Self::with_documents(documents, EnvelopeStatus::Acknowledged, Some(track_id), None)
    }

    pub fn failed(documents: &[SignedDocument], status: EnvelopeStatus, detail: String) -> Self {
        Self::with_documents(documents, status, None, Some(detail))
    }
}

/// An ordered batch of signed documents destined for one transmission.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub caratula: Caratula,
    pub documents: Vec<SignedDocument>,
    pub channel: Channel,
    status: EnvelopeStatus,
    results: Vec<ExchangeResult>,
}

impl Envelope {
    pub fn new(caratula: Caratula) -> Self {
        Self {
            caratula,
            documents: Vec::new(),
            channel: Channel::Sii,
            status: EnvelopeStatus::Pending,
            results: Vec::new(),
        }
    }

    /// Route the envelope through a different channel.
    pub fn via(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn add_document(&mut self, document: SignedDocument) {
        self.documents.push(document);
    }

    pub fn status(&self) -> EnvelopeStatus {
        self.status
    }

    /// Advance the state machine; illegal transitions are ignored so a
    /// result is still recorded for an envelope that never left Pending.
    pub(crate) fn advance(&mut self, next: EnvelopeStatus) {
        if self.status.can_advance_to(next) {
            self.status = next;
        }
    }

    /// Results of every send attempt, oldest first.
    pub fn results(&self) -> &[ExchangeResult] {
        &self.results
    }

    pub(crate) fn push_result(&mut self, result: ExchangeResult) {
        self.results.push(result);
    }

    /// Signature reference of the document set inside the envelope.
    pub fn reference_id(&self) -> &'static str {
        "SetDoc"
    }

    /// Structural schema validation, run before any network attempt.
    pub fn validate_schema(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.documents.is_empty() {
            errors.push(ValidationError::new(
                "SetDTE",
                "envelope must carry at least one document",
            ));
        }

        for (i, doc) in self.documents.iter().enumerate() {
            if doc.folio == 0 {
                errors.push(ValidationError::new(
                    format!("SetDTE.DTE[{i}].Folio"),
                    "folio must be greater than zero",
                ));
            }
            if !is_known_type_code(doc.type_code) {
                errors.push(ValidationError::new(
                    format!("SetDTE.DTE[{i}].TipoDTE"),
                    format!("'{}' is not an electronic document type code", doc.type_code),
                ));
            }
            if doc.xml.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("SetDTE.DTE[{i}]"),
                    "signed document body is empty",
                ));
            }
        }

        if self.caratula.resolution_date.is_none() || self.caratula.resolution_number.is_none() {
            errors.push(ValidationError::new(
                "Caratula",
                "resolution date and number must be present",
            ));
        }

        errors
    }

    /// Render the `EnvioDTE` body. The result still needs the external
    /// signature over [`reference_id`](Self::reference_id) before upload.
    pub fn to_xml(&self) -> Result<String, FormatError> {
        let mut writer = XmlWriter::new()?;

        writer.start_element_with_attrs(
            "EnvioDTE",
            &[
                ("xmlns", crate::formats::SII_DTE_NS),
                ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
                (
                    "xsi:schemaLocation",
                    "http://www.sii.cl/SiiDte EnvioDTE_v10.xsd",
                ),
                ("version", "1.0"),
            ],
        )?;
        writer.start_element_with_attrs("SetDTE", &[("ID", self.reference_id())])?;

        writer.start_element_with_attrs("Caratula", &[("version", "1.0")])?;
        writer.text_element("RutEmisor", &self.caratula.issuer.to_string())?;
        writer.text_element("RutEnvia", &self.caratula.sender.to_string())?;
        writer.text_element("RutReceptor", &self.caratula.receiver.to_string())?;
        if let Some(date) = self.caratula.resolution_date {
            writer.text_element("FchResol", &date.format("%Y-%m-%d").to_string())?;
        }
        if let Some(number) = self.caratula.resolution_number {
            writer.text_element("NroResol", &number.to_string())?;
        }
        writer.text_element(
            "TmstFirmaEnv",
            &chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        )?;
        for (type_code, count) in self.subtotals() {
            writer.start_element("SubTotDTE")?;
            writer.text_element("TpoDTE", &type_code.to_string())?;
            writer.text_element("NroDTE", &count.to_string())?;
            writer.end_element("SubTotDTE")?;
        }
        writer.end_element("Caratula")?;

        for document in &self.documents {
            writer.raw(strip_declaration(&document.xml))?;
        }

        writer.end_element("SetDTE")?;
        writer.end_element("EnvioDTE")?;
        writer.into_string()
    }

    /// Document counts per type code, in order of first appearance.
    fn subtotals(&self) -> Vec<(u16, usize)> {
        let mut subtotals: Vec<(u16, usize)> = Vec::new();
        for doc in &self.documents {
            match subtotals.iter_mut().find(|(code, _)| *code == doc.type_code) {
                Some((_, count)) => *count += 1,
                None => subtotals.push((doc.type_code, 1)),
            }
        }
        subtotals
    }
}

fn strip_declaration(xml: &str) -> &str {
    let trimmed = xml.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<?xml") {
        if let Some(end) = rest.find("?>") {
            return rest[end + 2..].trim_start();
        }
    }
    trimmed
}

/// A batch of envelopes processed together, plus any inbound raw
/// documents awaiting reception.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeBag {
    pub envelopes: Vec<Envelope>,
    /// Raw DTE XML received from counterparties, processed when the bag
    /// carries no outbound envelopes.
    pub inbound: Vec<String>,
}

impl EnvelopeBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_envelope(&mut self, envelope: Envelope) {
        self.envelopes.push(envelope);
    }

    pub fn push_inbound(&mut self, raw_xml: impl Into<String>) {
        self.inbound.push(raw_xml.into());
    }

    /// A bag with no outbound envelopes routes to the receiver path.
    pub fn is_inbound(&self) -> bool {
        self.envelopes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caratula() -> Caratula {
        Caratula::to_sii(
            "76192083-9".parse().unwrap(),
            "76192083-9".parse().unwrap(),
            NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            80,
        )
    }

    fn document(folio: u64) -> SignedDocument {
        SignedDocument {
            type_code: 33,
            folio,
            xml: format!("<DTE version=\"1.0\"><Documento ID=\"T33F{folio}\"><X>1</X></Documento></DTE>"),
        }
    }

    #[test]
    fn status_machine_transitions() {
        use EnvelopeStatus::*;
        assert!(Pending.can_advance_to(Sent));
        assert!(Sent.can_advance_to(Acknowledged));
        assert!(Sent.can_advance_to(Rejected));
        assert!(Sent.can_advance_to(TransportFailed));
        assert!(!Pending.can_advance_to(Acknowledged));
        assert!(!Acknowledged.can_advance_to(Sent));
    }

    #[test]
    fn schema_rejects_empty_envelope() {
        let envelope = Envelope::new(caratula());
        let errors = envelope.validate_schema();
        assert!(errors.iter().any(|e| e.field == "SetDTE"));
    }

    #[test]
    fn schema_rejects_missing_resolution() {
        let mut caratula = caratula();
        caratula.resolution_number = None;
        let mut envelope = Envelope::new(caratula);
        envelope.add_document(document(1));
        let errors = envelope.validate_schema();
        assert!(errors.iter().any(|e| e.field == "Caratula"));
    }

    #[test]
    fn schema_rejects_zero_folio_and_unknown_type() {
        let mut envelope = Envelope::new(caratula());
        envelope.add_document(SignedDocument {
            type_code: 30,
            folio: 0,
            xml: "<DTE/>".into(),
        });
        let errors = envelope.validate_schema();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn envelope_xml_carries_caratula_and_documents() {
        let mut envelope = Envelope::new(caratula());
        envelope.add_document(document(1));
        envelope.add_document(document(2));

        let xml = envelope.to_xml().unwrap();
        assert!(xml.contains("<EnvioDTE"));
        assert!(xml.contains("<RutEmisor>76192083-9</RutEmisor>"));
        assert!(xml.contains("<RutReceptor>60803000-K</RutReceptor>"));
        assert!(xml.contains("<NroResol>80</NroResol>"));
        assert!(xml.contains("<TpoDTE>33</TpoDTE>"));
        assert!(xml.contains("<NroDTE>2</NroDTE>"));
        assert!(xml.contains("ID=\"T33F1\""));
        assert!(xml.contains("ID=\"T33F2\""));
        // Embedded documents keep a single declaration at the top.
        assert_eq!(xml.matches("<?xml").count(), 1);
    }

    #[test]
    fn subtotals_group_in_first_appearance_order() {
        let mut envelope = Envelope::new(caratula());
        envelope.add_document(document(1));
        envelope.add_document(SignedDocument {
            type_code: 61,
            folio: 9,
            xml: "<DTE><Documento><X>1</X></Documento></DTE>".into(),
        });
        envelope.add_document(document(2));
        assert_eq!(envelope.subtotals(), vec![(33, 2), (61, 1)]);
    }
}
