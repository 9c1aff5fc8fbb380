use std::time::{Duration, Instant};

use quick_xml::events::Event;

use super::auth::{AuthSession, AuthStage, TokenCache};
use super::envelope::Envelope;
use super::transport::{SiiTransport, UploadRequest};
use super::SiiError;
use crate::core::{Rut, XmlSigner};

/// Target SII environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiiEnvironment {
    /// palena.sii.cl — live submissions.
    Production,
    /// maullin.sii.cl — certification sandbox.
    Certification,
}

impl SiiEnvironment {
    pub fn host(self) -> &'static str {
        match self {
            Self::Production => "palena.sii.cl",
            Self::Certification => "maullin.sii.cl",
        }
    }

    pub fn seed_url(self) -> String {
        format!("https://{}/DTEWS/CrSeed.jws", self.host())
    }

    pub fn token_url(self) -> String {
        format!("https://{}/DTEWS/GetTokenFromSeed.jws", self.host())
    }

    pub fn upload_url(self) -> String {
        format!("https://{}/cgi_dte/UPL/DTEUpload", self.host())
    }

    pub fn status_url(self) -> String {
        format!("https://{}/DTEWS/QueryEstUp.jws", self.host())
    }
}

/// Gateway configuration. Defaults target the certification sandbox.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: SiiEnvironment,
    /// How long an issued token is reused before re-authenticating.
    pub token_ttl: Duration,
    /// Pause between transient-failure retries of the upload call.
    pub retry_wait: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            environment: SiiEnvironment::Certification,
            token_ttl: Duration::from_secs(60 * 60),
            retry_wait: Duration::from_secs(1),
        }
    }
}

/// Upload status reported by the authority for a tracked envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStatus {
    /// Authority status code (`EPR` accepted, `RCT` rejected, …).
    pub code: String,
    pub description: Option<String>,
}

/// Owns the authentication protocol and webservice calls.
///
/// Authentication is lazy: nothing happens until the first token is
/// needed, and a cached token is reused until its validity window
/// elapses.
pub struct SiiGateway<T: SiiTransport> {
    transport: T,
    config: GatewayConfig,
    cache: TokenCache,
}

impl<T: SiiTransport> SiiGateway<T> {
    pub fn new(transport: T, config: GatewayConfig) -> Self {
        Self {
            transport,
            config,
            cache: TokenCache::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Bearer token for the signer's identity.
    ///
    /// A cached, unexpired token is returned without any network call.
    /// Otherwise the seed → sign → token handshake runs; concurrent
    /// callers for the same identity wait on the in-flight refresh.
    pub async fn get_token(&self, signer: &dyn XmlSigner) -> Result<String, SiiError> {
        let slot = self.cache.slot(signer.identity());
        let mut session = slot.lock().await;

        if let Some(current) = session.as_ref() {
            if current.is_valid() {
                tracing::debug!(identity = signer.identity(), "token cache hit");
                return Ok(current.token.clone());
            }
        }

        tracing::debug!(identity = signer.identity(), "authenticating against SII");
        let fresh = self.authenticate(signer).await?;
        let token = fresh.token.clone();
        *session = Some(fresh);
        Ok(token)
    }

    async fn authenticate(&self, signer: &dyn XmlSigner) -> Result<AuthSession, SiiError> {
        // Seed.
        let seed_request = soap_envelope("getSeed", "");
        let seed_response = self
            .transport
            .soap_call(&self.config.environment.seed_url(), "", &seed_request)
            .await
            .map_err(|e| SiiError::AuthenticationFailed {
                stage: AuthStage::Seed,
                detail: e.to_string(),
                request: seed_request.clone(),
                response: e.response_body().map(String::from),
            })?;

        check_estado(AuthStage::Seed, &seed_request, &seed_response)?;
        let seed = extract_tag(&seed_response, "SEMILLA").ok_or_else(|| {
            SiiError::AuthenticationFailed {
                stage: AuthStage::Seed,
                detail: "response carries no SEMILLA".into(),
                request: seed_request.clone(),
                response: Some(seed_response.clone()),
            }
        })?;

        // Sign.
        let seed_document = format!("<getToken><item><Semilla>{seed}</Semilla></item></getToken>");
        let signed_seed =
            signer
                .sign(&seed_document, "")
                .map_err(|e| SiiError::AuthenticationFailed {
                    stage: AuthStage::Sign,
                    detail: e.to_string(),
                    request: seed_document.clone(),
                    response: None,
                })?;

        // Token.
        let escaped = quick_xml::escape::escape(signed_seed.as_str());
        let token_request = soap_envelope("getToken", &format!("<pszXml>{escaped}</pszXml>"));
        let token_response = self
            .transport
            .soap_call(&self.config.environment.token_url(), "", &token_request)
            .await
            .map_err(|e| SiiError::AuthenticationFailed {
                stage: AuthStage::TokenExchange,
                detail: e.to_string(),
                request: token_request.clone(),
                response: e.response_body().map(String::from),
            })?;

        check_estado(AuthStage::TokenExchange, &token_request, &token_response)?;
        let token = extract_tag(&token_response, "TOKEN").ok_or_else(|| {
            SiiError::AuthenticationFailed {
                stage: AuthStage::TokenExchange,
                detail: "response carries no TOKEN".into(),
                request: token_request.clone(),
                response: Some(token_response.clone()),
            }
        })?;

        Ok(AuthSession {
            seed,
            signed_seed,
            token,
            expires_at: Instant::now() + self.config.token_ttl,
        })
    }

    /// Transmit a signed envelope, returning the authority's tracking
    /// identifier.
    ///
    /// The envelope schema is checked before anything touches the
    /// network; a retry budget of 0 means "do not send" and
    /// short-circuits likewise. Only transport-class failures are
    /// retried, up to `retries` attempts.
    pub async fn send_envelope(
        &self,
        signer: &dyn XmlSigner,
        envelope: &Envelope,
        retries: u32,
    ) -> Result<u64, SiiError> {
        let schema_errors = envelope.validate_schema();
        if !schema_errors.is_empty() {
            return Err(SiiError::Schema(schema_errors));
        }

        if retries == 0 {
            return Err(SiiError::Transport {
                attempts: 0,
                message: "retry budget is zero; transmission skipped".into(),
                last_response: None,
            });
        }

        let sender: Rut = signer.identity().parse().map_err(|e: crate::core::RutError| {
            SiiError::AuthenticationFailed {
                stage: AuthStage::Sign,
                detail: format!("signer identity is not a RUT: {e}"),
                request: String::new(),
                response: None,
            }
        })?;

        let token = self.get_token(signer).await?;

        let body = envelope.to_xml()?;
        let signed = signer.sign(&body, envelope.reference_id())?;
        let file_name = format!(
            "envio_{}_{}.xml",
            envelope.caratula.issuer,
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        );
        let upload = UploadRequest {
            sender,
            company: envelope.caratula.issuer,
            file_name: &file_name,
            content: &signed,
        };

        let url = self.config.environment.upload_url();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.upload(&url, &token, &upload).await {
                Ok(response) => {
                    let track_id = extract_tag(&response, "TRACKID")
                        .ok_or_else(|| SiiError::InvalidTrackingId(response.clone()))?;
                    let track_id: u64 = track_id
                        .trim()
                        .parse()
                        .map_err(|_| SiiError::InvalidTrackingId(track_id))?;
                    tracing::info!(track_id, attempts = attempt, "envelope accepted for processing");
                    return Ok(track_id);
                }
                Err(e) if e.is_transient() && attempt < retries => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        "transient transport failure, retrying"
                    );
                    tokio::time::sleep(self.config.retry_wait).await;
                }
                Err(e) => {
                    return Err(SiiError::Transport {
                        attempts: attempt,
                        message: e.to_string(),
                        last_response: e.response_body().map(String::from),
                    });
                }
            }
        }
    }

    /// Poll the processing status of a tracked envelope.
    pub async fn query_status(
        &self,
        signer: &dyn XmlSigner,
        company: Rut,
        track_id: u64,
    ) -> Result<UploadStatus, SiiError> {
        let token = self.get_token(signer).await?;

        let params = format!(
            "<RutConsultante>{}</RutConsultante><DvConsultante>{}</DvConsultante>\
             <TrackId>{track_id}</TrackId><Token>{token}</Token>",
            company.number(),
            company.check_digit(),
        );
        let request = soap_envelope("getEstUp", &params);
        let response = self
            .transport
            .soap_call(&self.config.environment.status_url(), "", &request)
            .await
            .map_err(|e| SiiError::Transport {
                attempts: 1,
                message: e.to_string(),
                last_response: e.response_body().map(String::from),
            })?;

        let code = extract_tag(&response, "ESTADO").ok_or_else(|| SiiError::Transport {
            attempts: 1,
            message: "status response carries no ESTADO".into(),
            last_response: Some(response.clone()),
        })?;

        Ok(UploadStatus {
            code,
            description: extract_tag(&response, "GLOSA"),
        })
    }
}

/// Wrap operation parameters in a SOAP 1.1 envelope.
fn soap_envelope(operation: &str, params: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"><SOAP-ENV:Body><m:{operation} xmlns:m="http://DefaultNamespace">{params}</m:{operation}></SOAP-ENV:Body></SOAP-ENV:Envelope>"#
    )
}

/// The authority wraps webservice results in an ESTADO code; "00" is
/// success.
fn check_estado(stage: AuthStage, request: &str, response: &str) -> Result<(), SiiError> {
    if let Some(code) = extract_tag(response, "ESTADO") {
        if code != "00" {
            let glosa = extract_tag(response, "GLOSA").unwrap_or_default();
            return Err(SiiError::AuthenticationFailed {
                stage,
                detail: format!("authority returned ESTADO {code}: {glosa}"),
                request: request.to_string(),
                response: Some(response.to_string()),
            });
        }
    }
    Ok(())
}

/// First text content under `tag`, matching on the local name. Falls
/// back to unescaping the body once: the webservice returns its payload
/// XML-escaped inside the SOAP result element.
pub(crate) fn extract_tag(body: &str, tag: &str) -> Option<String> {
    fn scan(body: &str, tag: &str) -> Option<String> {
        let mut reader = quick_xml::Reader::from_str(body);
        reader.config_mut().trim_text(true);
        let mut depth = 0u32;
        let mut value = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    if depth > 0 {
                        depth += 1;
                    } else if start.local_name().as_ref() == tag.as_bytes() {
                        depth = 1;
                    }
                }
                Ok(Event::Text(text)) if depth > 0 => {
                    value.push_str(&text.unescape().ok()?);
                }
                Ok(Event::CData(cdata)) if depth > 0 => {
                    value.push_str(&String::from_utf8_lossy(&cdata));
                }
                Ok(Event::End(_)) if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(value);
                    }
                }
                Ok(Event::Eof) => return None,
                Ok(_) => {}
                Err(_) => return None,
            }
        }
    }

    scan(body, tag).or_else(|| {
        let unescaped = quick_xml::escape::unescape(body).ok()?;
        if unescaped == body {
            None
        } else {
            scan(&unescaped, tag)
        }
    })
}
