use super::SiiError;
use super::envelope::{
    Channel, DocumentStatus, Envelope, EnvelopeBag, EnvelopeStatus, ExchangeResult,
};
use super::gateway::SiiGateway;
use super::transport::SiiTransport;
use crate::core::{Rut, ValidateError, ValidatorDispatch, XmlSigner};

/// Coordinator options shared by every envelope in a bag.
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    /// Upload retry budget per envelope; 0 means "do not send".
    pub retries: u32,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self { retries: 3 }
    }
}

/// Batches documents into envelopes and drives the sender/receiver
/// workflows.
///
/// Partial failure is never fatal to a batch: every envelope gets
/// exactly one [`ExchangeResult`] per attempt, in input order.
pub struct ExchangeCoordinator<T: SiiTransport> {
    gateway: SiiGateway<T>,
    dispatch: ValidatorDispatch,
    options: ExchangeOptions,
}

impl<T: SiiTransport> ExchangeCoordinator<T> {
    pub fn new(gateway: SiiGateway<T>, options: ExchangeOptions) -> Self {
        Self {
            gateway,
            dispatch: ValidatorDispatch::standard(),
            options,
        }
    }

    /// Replace the validation registry used on the inbound path.
    pub fn with_dispatch(mut self, dispatch: ValidatorDispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn gateway(&self) -> &SiiGateway<T> {
        &self.gateway
    }

    /// Route the bag: a bag with no outbound envelopes goes to the
    /// receiver, anything else to the sender.
    pub async fn process(
        &self,
        signer: &dyn XmlSigner,
        bag: &mut EnvelopeBag,
    ) -> Vec<ExchangeResult> {
        if bag.is_inbound() {
            self.receive(bag)
        } else {
            self.send(signer, bag).await
        }
    }

    /// Send every envelope in the bag, appending one result per envelope
    /// regardless of individual outcomes.
    pub async fn send(
        &self,
        signer: &dyn XmlSigner,
        bag: &mut EnvelopeBag,
    ) -> Vec<ExchangeResult> {
        let mut results = Vec::with_capacity(bag.envelopes.len());
        for envelope in &mut bag.envelopes {
            let result = self.send_envelope(signer, envelope).await;
            envelope.push_result(result.clone());
            results.push(result);
        }
        results
    }

    async fn send_envelope(&self, signer: &dyn XmlSigner, envelope: &mut Envelope) -> ExchangeResult {
        match envelope.channel {
            Channel::Email => {
                // No sender exists for this channel; an empty success
                // would silently drop the envelope.
                let error = SiiError::NotImplemented(Channel::Email.name());
                ExchangeResult::failed(
                    &envelope.documents,
                    EnvelopeStatus::Rejected,
                    error.to_string(),
                )
            }
            Channel::Sii => {
                // Cheap option gate before any network attempt.
                if let Err(refusal) = self.can_handle(signer, envelope) {
                    return ExchangeResult::failed(
                        &envelope.documents,
                        EnvelopeStatus::Rejected,
                        refusal,
                    );
                }

                envelope.advance(EnvelopeStatus::Sent);
                match self
                    .gateway
                    .send_envelope(signer, envelope, self.options.retries)
                    .await
                {
                    Ok(track_id) => {
                        envelope.advance(EnvelopeStatus::Acknowledged);
                        tracing::info!(track_id, "envelope acknowledged");
                        ExchangeResult::acknowledged(&envelope.documents, track_id)
                    }
                    Err(error @ SiiError::Transport { .. }) => {
                        envelope.advance(EnvelopeStatus::TransportFailed);
                        ExchangeResult::failed(
                            &envelope.documents,
                            EnvelopeStatus::TransportFailed,
                            error.to_string(),
                        )
                    }
                    Err(error) => {
                        envelope.advance(EnvelopeStatus::Rejected);
                        ExchangeResult::failed(
                            &envelope.documents,
                            EnvelopeStatus::Rejected,
                            error.to_string(),
                        )
                    }
                }
            }
        }
    }

    /// Whether the SII sender has the channel options it needs.
    fn can_handle(&self, signer: &dyn XmlSigner, envelope: &Envelope) -> Result<(), String> {
        if signer.identity().parse::<Rut>().is_err() {
            return Err(format!(
                "channel options missing: signer identity '{}' is not a valid RUT",
                signer.identity()
            ));
        }
        if envelope.caratula.resolution_date.is_none()
            || envelope.caratula.resolution_number.is_none()
        {
            return Err(
                "channel options missing: SII resolution date/number absent from caratula".into(),
            );
        }
        Ok(())
    }

    /// Inbound path: parse and validate received DTE XML, acknowledging
    /// or rejecting each document.
    pub fn receive(&self, bag: &mut EnvelopeBag) -> Vec<ExchangeResult> {
        bag.inbound
            .iter()
            .map(|raw| self.receive_document(raw))
            .collect()
    }

    fn receive_document(&self, raw: &str) -> ExchangeResult {
        let doc = match crate::formats::parse("xml", raw) {
            Ok(doc) => doc,
            Err(error) => {
                return ExchangeResult {
                    status: EnvelopeStatus::Rejected,
                    track_id: None,
                    documents: Vec::new(),
                    detail: Some(error.to_string()),
                };
            }
        };

        let type_code = doc.type_code().unwrap_or(0);
        let folio = doc.folio().unwrap_or(0);
        let statuses = |status| {
            vec![DocumentStatus {
                type_code,
                folio,
                status,
            }]
        };

        match self.dispatch.validate(type_code, &doc) {
            Ok(()) => ExchangeResult {
                status: EnvelopeStatus::Acknowledged,
                track_id: None,
                documents: statuses(EnvelopeStatus::Acknowledged),
                detail: None,
            },
            Err(error) => {
                let detail = match &error {
                    ValidateError::Invalid(errors) => errors
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; "),
                    other => other.to_string(),
                };
                ExchangeResult {
                    status: EnvelopeStatus::Rejected,
                    track_id: None,
                    documents: statuses(EnvelopeStatus::Rejected),
                    detail: Some(detail),
                }
            }
        }
    }
}
