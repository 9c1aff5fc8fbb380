//! Gateway and coordinator integration tests against a scripted
//! transport: token caching, retry discipline, and per-envelope result
//! accounting.

#![cfg(feature = "sii")]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use tributo::core::{SignError, XmlSigner};
use tributo::sii::{
    Caratula, Channel, Envelope, EnvelopeBag, EnvelopeStatus, ExchangeCoordinator,
    ExchangeOptions, GatewayConfig, SiiError, SiiGateway, SiiTransport, TransportError,
    UploadRequest,
};

const SEED_RESPONSE: &str = "<SII:RESPUESTA><SII:RESP_HDR><ESTADO>00</ESTADO></SII:RESP_HDR>\
     <SII:RESP_BODY><SEMILLA>034192293</SEMILLA></SII:RESP_BODY></SII:RESPUESTA>";
const TOKEN_RESPONSE: &str = "<SII:RESPUESTA><SII:RESP_HDR><ESTADO>00</ESTADO></SII:RESP_HDR>\
     <SII:RESP_BODY><TOKEN>ABC123</TOKEN></SII:RESP_BODY></SII:RESPUESTA>";

#[derive(Default)]
struct ScriptedTransport {
    seed_calls: AtomicU32,
    token_calls: AtomicU32,
    upload_calls: AtomicU32,
    /// Scripted upload outcomes, consumed front to back; empty means
    /// acknowledge with track id 12345.
    uploads: Mutex<VecDeque<Result<String, TransportError>>>,
    seed_response: Mutex<Option<String>>,
}

impl ScriptedTransport {
    fn script_uploads(outcomes: Vec<Result<String, TransportError>>) -> Self {
        Self {
            uploads: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    fn with_seed_response(response: &str) -> Self {
        Self {
            seed_response: Mutex::new(Some(response.to_string())),
            ..Self::default()
        }
    }
}

impl SiiTransport for ScriptedTransport {
    async fn soap_call(
        &self,
        url: &str,
        _action: &str,
        _body: &str,
    ) -> Result<String, TransportError> {
        if url.contains("CrSeed") {
            self.seed_calls.fetch_add(1, Ordering::SeqCst);
            let custom = self.seed_response.lock().unwrap().clone();
            Ok(custom.unwrap_or_else(|| SEED_RESPONSE.to_string()))
        } else if url.contains("GetTokenFromSeed") {
            self.token_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TOKEN_RESPONSE.to_string())
        } else {
            Ok("<SII:RESPUESTA><SII:RESP_HDR><ESTADO>EPR</ESTADO>\
                <GLOSA>Envio Procesado</GLOSA></SII:RESP_HDR></SII:RESPUESTA>"
                .to_string())
        }
    }

    async fn upload(
        &self,
        _url: &str,
        _token: &str,
        _request: &UploadRequest<'_>,
    ) -> Result<String, TransportError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("<RECEPCIONDTE><TRACKID>12345</TRACKID></RECEPCIONDTE>".into()))
    }
}

struct StubSigner;

impl XmlSigner for StubSigner {
    fn identity(&self) -> &str {
        "76192083-9"
    }

    fn sign(&self, xml: &str, _reference: &str) -> Result<String, SignError> {
        Ok(xml.to_string())
    }
}

struct BrokenSigner;

impl XmlSigner for BrokenSigner {
    fn identity(&self) -> &str {
        "76192083-9"
    }

    fn sign(&self, _xml: &str, _reference: &str) -> Result<String, SignError> {
        Err(SignError::Certificate("certificate store locked".into()))
    }
}

fn config() -> GatewayConfig {
    GatewayConfig {
        retry_wait: Duration::ZERO,
        ..GatewayConfig::default()
    }
}

fn caratula() -> Caratula {
    Caratula::to_sii(
        "76192083-9".parse().unwrap(),
        "76192083-9".parse().unwrap(),
        NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
        80,
    )
}

fn envelope(folio: u64) -> Envelope {
    let mut envelope = Envelope::new(caratula());
    envelope.add_document(tributo::sii::SignedDocument {
        type_code: 33,
        folio,
        xml: format!("<DTE version=\"1.0\"><Documento ID=\"T33F{folio}\"><F>{folio}</F></Documento></DTE>"),
    });
    envelope
}

// --- token lifecycle ---

#[tokio::test]
async fn token_is_cached_within_the_validity_window() {
    let gateway = SiiGateway::new(ScriptedTransport::default(), config());

    let first = gateway.get_token(&StubSigner).await.unwrap();
    let second = gateway.get_token(&StubSigner).await.unwrap();

    assert_eq!(first, "ABC123");
    assert_eq!(first, second);
    let transport = gateway.transport();
    assert_eq!(transport.seed_calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.token_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_token_triggers_a_new_handshake() {
    let gateway = SiiGateway::new(
        ScriptedTransport::default(),
        GatewayConfig {
            token_ttl: Duration::ZERO,
            retry_wait: Duration::ZERO,
            ..GatewayConfig::default()
        },
    );

    gateway.get_token(&StubSigner).await.unwrap();
    gateway.get_token(&StubSigner).await.unwrap();

    let transport = gateway.transport();
    assert_eq!(transport.seed_calls.load(Ordering::SeqCst), 2);
    assert_eq!(transport.token_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn authentication_failure_carries_request_and_response() {
    let failure = "<SII:RESPUESTA><SII:RESP_HDR><ESTADO>-07</ESTADO>\
         <GLOSA>Semilla no valida</GLOSA></SII:RESP_HDR></SII:RESPUESTA>";
    let gateway = SiiGateway::new(ScriptedTransport::with_seed_response(failure), config());

    match gateway.get_token(&StubSigner).await {
        Err(SiiError::AuthenticationFailed {
            detail,
            request,
            response,
            ..
        }) => {
            assert!(detail.contains("-07"));
            assert!(detail.contains("Semilla no valida"));
            assert!(request.contains("getSeed"));
            assert!(response.is_some());
        }
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn signer_failure_is_an_authentication_failure() {
    let gateway = SiiGateway::new(ScriptedTransport::default(), config());
    let err = gateway.get_token(&BrokenSigner).await.unwrap_err();
    assert!(matches!(err, SiiError::AuthenticationFailed { .. }));
    assert!(err.to_string().contains("seed signing"));
}

// --- send discipline ---

#[tokio::test]
async fn zero_retry_budget_never_touches_the_transport() {
    let gateway = SiiGateway::new(ScriptedTransport::default(), config());

    let err = gateway
        .send_envelope(&StubSigner, &envelope(1), 0)
        .await
        .unwrap_err();

    assert!(matches!(err, SiiError::Transport { attempts: 0, .. }));
    let transport = gateway.transport();
    assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 0);
    assert_eq!(transport.seed_calls.load(Ordering::SeqCst), 0, "no token request either");
}

#[tokio::test]
async fn schema_failure_short_circuits_before_any_network_call() {
    let gateway = SiiGateway::new(ScriptedTransport::default(), config());
    let empty = Envelope::new(caratula());

    let err = gateway
        .send_envelope(&StubSigner, &empty, 3)
        .await
        .unwrap_err();

    assert!(matches!(err, SiiError::Schema(_)));
    let transport = gateway.transport();
    assert_eq!(transport.seed_calls.load(Ordering::SeqCst), 0);
    assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_failures_are_retried_within_budget() {
    let transport = ScriptedTransport::script_uploads(vec![
        Err(TransportError::Timeout("30s".into())),
        Err(TransportError::Status {
            status: 503,
            body: "mantenimiento".into(),
        }),
        Ok("<RECEPCIONDTE><TRACKID>777</TRACKID></RECEPCIONDTE>".into()),
    ]);
    let gateway = SiiGateway::new(transport, config());

    let track_id = gateway
        .send_envelope(&StubSigner, &envelope(1), 3)
        .await
        .unwrap();

    assert_eq!(track_id, 777);
    assert_eq!(gateway.transport().upload_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn permanent_status_is_not_retried() {
    let transport = ScriptedTransport::script_uploads(vec![Err(TransportError::Status {
        status: 401,
        body: "TOKEN invalido".into(),
    })]);
    let gateway = SiiGateway::new(transport, config());

    let err = gateway
        .send_envelope(&StubSigner, &envelope(1), 5)
        .await
        .unwrap_err();

    match err {
        SiiError::Transport {
            attempts,
            last_response,
            ..
        } => {
            assert_eq!(attempts, 1);
            assert_eq!(last_response.as_deref(), Some("TOKEN invalido"));
        }
        other => panic!("expected Transport, got {other:?}"),
    }
    assert_eq!(gateway.transport().upload_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_budget_attaches_the_last_response() {
    let transport = ScriptedTransport::script_uploads(vec![
        Err(TransportError::Status {
            status: 503,
            body: "primera caida".into(),
        }),
        Err(TransportError::Status {
            status: 503,
            body: "segunda caida".into(),
        }),
    ]);
    let gateway = SiiGateway::new(transport, config());

    let err = gateway
        .send_envelope(&StubSigner, &envelope(1), 2)
        .await
        .unwrap_err();

    match err {
        SiiError::Transport {
            attempts,
            last_response,
            ..
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(last_response.as_deref(), Some("segunda caida"));
        }
        other => panic!("expected Transport, got {other:?}"),
    }
}

#[tokio::test]
async fn non_numeric_track_id_is_rejected() {
    let transport = ScriptedTransport::script_uploads(vec![Ok(
        "<RECEPCIONDTE><TRACKID>PENDIENTE</TRACKID></RECEPCIONDTE>".into(),
    )]);
    let gateway = SiiGateway::new(transport, config());

    let err = gateway
        .send_envelope(&StubSigner, &envelope(1), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, SiiError::InvalidTrackingId(_)));
}

// --- coordinator ---

#[tokio::test]
async fn every_envelope_gets_a_result_in_input_order() {
    let transport = ScriptedTransport::script_uploads(vec![
        Ok("<RECEPCIONDTE><TRACKID>111</TRACKID></RECEPCIONDTE>".into()),
        Err(TransportError::Timeout("30s".into())),
        Ok("<RECEPCIONDTE><TRACKID>333</TRACKID></RECEPCIONDTE>".into()),
    ]);
    let coordinator = ExchangeCoordinator::new(
        SiiGateway::new(transport, config()),
        ExchangeOptions { retries: 1 },
    );

    let mut bag = EnvelopeBag::new();
    bag.push_envelope(envelope(1));
    bag.push_envelope(envelope(2));
    bag.push_envelope(envelope(3));

    let results = coordinator.process(&StubSigner, &mut bag).await;

    assert_eq!(results.len(), 3, "every envelope gets exactly one result");
    assert_eq!(results[0].status, EnvelopeStatus::Acknowledged);
    assert_eq!(results[0].track_id, Some(111));
    assert_eq!(results[1].status, EnvelopeStatus::TransportFailed);
    assert!(results[1].detail.as_deref().unwrap_or("").contains("transport"));
    assert_eq!(results[2].status, EnvelopeStatus::Acknowledged);
    assert_eq!(results[2].track_id, Some(333));

    // Envelope state machines and result logs agree.
    assert_eq!(bag.envelopes[0].status(), EnvelopeStatus::Acknowledged);
    assert_eq!(bag.envelopes[1].status(), EnvelopeStatus::TransportFailed);
    assert_eq!(bag.envelopes[2].status(), EnvelopeStatus::Acknowledged);
    assert_eq!(bag.envelopes[1].results().len(), 1);

    // Per-document statuses mirror the envelope outcome.
    assert_eq!(results[1].documents.len(), 1);
    assert_eq!(results[1].documents[0].folio, 2);
    assert_eq!(results[1].documents[0].status, EnvelopeStatus::TransportFailed);
}

#[tokio::test]
async fn email_channel_is_not_implemented_and_not_silent() {
    let coordinator = ExchangeCoordinator::new(
        SiiGateway::new(ScriptedTransport::default(), config()),
        ExchangeOptions::default(),
    );

    let mut bag = EnvelopeBag::new();
    bag.push_envelope(envelope(1).via(Channel::Email));

    let results = coordinator.send(&StubSigner, &mut bag).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, EnvelopeStatus::Rejected);
    assert!(results[0].detail.as_deref().unwrap().contains("not implemented"));
    assert_eq!(
        coordinator.gateway().transport().upload_calls.load(Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn missing_channel_options_refuse_before_any_network_attempt() {
    let coordinator = ExchangeCoordinator::new(
        SiiGateway::new(ScriptedTransport::default(), config()),
        ExchangeOptions::default(),
    );

    let mut caratula = caratula();
    caratula.resolution_number = None;
    let mut envelope_without_resolution = Envelope::new(caratula);
    envelope_without_resolution.add_document(tributo::sii::SignedDocument {
        type_code: 33,
        folio: 1,
        xml: "<DTE><Documento><F>1</F></Documento></DTE>".into(),
    });

    let mut bag = EnvelopeBag::new();
    bag.push_envelope(envelope_without_resolution);

    let results = coordinator.send(&StubSigner, &mut bag).await;
    assert_eq!(results[0].status, EnvelopeStatus::Rejected);
    assert!(results[0].detail.as_deref().unwrap().contains("channel options missing"));

    let transport = coordinator.gateway().transport();
    assert_eq!(transport.seed_calls.load(Ordering::SeqCst), 0);
    assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bag_without_envelopes_routes_to_the_receiver() {
    let coordinator = ExchangeCoordinator::new(
        SiiGateway::new(ScriptedTransport::default(), config()),
        ExchangeOptions::default(),
    );

    let mut bag = EnvelopeBag::new();
    bag.push_inbound(
        "<DTE><Documento>\
           <Encabezado>\
             <IdDoc><TipoDTE>33</TipoDTE><Folio>42</Folio><FchEmis>2026-03-01</FchEmis></IdDoc>\
             <Emisor><RUTEmisor>76192083-9</RUTEmisor><RznSoc>Proveedor SpA</RznSoc></Emisor>\
             <Receptor><RUTRecep>66666666-6</RUTRecep><RznSocRecep>Nosotros Ltda</RznSocRecep></Receptor>\
             <Totales><MntNeto>1000</MntNeto><IVA>190</IVA><MntTotal>1190</MntTotal></Totales>\
           </Encabezado>\
           <Detalle><NmbItem>Insumos</NmbItem><MontoItem>1190</MontoItem></Detalle>\
         </Documento></DTE>",
    );
    bag.push_inbound("<DTE><Documento><Encabezado><IdDoc><TipoDTE>33</TipoDTE></IdDoc></Encabezado></Documento></DTE>");

    let results = coordinator.process(&StubSigner, &mut bag).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, EnvelopeStatus::Acknowledged);
    assert_eq!(results[0].documents[0].folio, 42);
    assert_eq!(results[1].status, EnvelopeStatus::Rejected);
    // Rejection names the specific missing fields.
    assert!(results[1].detail.as_deref().unwrap().contains("Folio"));

    let transport = coordinator.gateway().transport();
    assert_eq!(transport.seed_calls.load(Ordering::SeqCst), 0, "reception is local");
}

#[tokio::test]
async fn status_poll_reports_the_authority_code() {
    let gateway = SiiGateway::new(ScriptedTransport::default(), config());
    let status = gateway
        .query_status(&StubSigner, "76192083-9".parse().unwrap(), 12345)
        .await
        .unwrap();
    assert_eq!(status.code, "EPR");
    assert_eq!(status.description.as_deref(), Some("Envio Procesado"));
}
