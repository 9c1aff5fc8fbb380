use std::time::Duration;

use thiserror::Error;

use crate::core::Rut;

/// Transport-level failure, classified for retry decisions.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Connection-level failure (DNS, TLS, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl TransportError {
    /// Transient failures are worth retrying; anything else is permanent
    /// until the input changes.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }

    /// The response body, when one was received.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// One envelope upload: who sends, on whose behalf, and the signed XML.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub sender: Rut,
    pub company: Rut,
    pub file_name: &'a str,
    pub content: &'a str,
}

/// Raw webservice calls to the tax authority.
///
/// The gateway drives the protocol; implementations only move bytes.
pub trait SiiTransport: Send + Sync {
    /// POST a SOAP request body to `url`, returning the response body.
    fn soap_call(
        &self,
        url: &str,
        action: &str,
        body: &str,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Upload a signed envelope under an authenticated token, returning
    /// the receipt body.
    fn upload(
        &self,
        url: &str,
        token: &str,
        request: &UploadRequest<'_>,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;
}

/// User agent the upload endpoint expects; other values are rejected
/// upstream.
const UPLOAD_USER_AGENT: &str = "Mozilla/4.0 (compatible; PROG 1.0; tributo)";

/// reqwest-backed transport speaking the production endpoints.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    fn classify(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }

    async fn read_success(response: reqwest::Response) -> Result<String, TransportError> {
        let status = response.status();
        let body = response.text().await.map_err(Self::classify)?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

impl SiiTransport for HttpTransport {
    async fn soap_call(
        &self,
        url: &str,
        action: &str,
        body: &str,
    ) -> Result<String, TransportError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(body.to_string())
            .send()
            .await
            .map_err(Self::classify)?;

        Self::read_success(response).await
    }

    async fn upload(
        &self,
        url: &str,
        token: &str,
        request: &UploadRequest<'_>,
    ) -> Result<String, TransportError> {
        let archive = reqwest::multipart::Part::text(request.content.to_string())
            .file_name(request.file_name.to_string())
            .mime_str("text/xml")
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("rutSender", request.sender.number().to_string())
            .text("dvSender", request.sender.check_digit().to_string())
            .text("rutCompany", request.company.number().to_string())
            .text("dvCompany", request.company.check_digit().to_string())
            .part("archivo", archive);

        let response = self
            .client
            .post(url)
            .header("User-Agent", UPLOAD_USER_AGENT)
            .header("Cookie", format!("TOKEN={token}"))
            .multipart(form)
            .send()
            .await
            .map_err(Self::classify)?;

        Self::read_success(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransportError::Network("reset".into()).is_transient());
        assert!(TransportError::Timeout("30s".into()).is_transient());
        assert!(
            TransportError::Status {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            TransportError::Status {
                status: 429,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !TransportError::Status {
                status: 401,
                body: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn status_errors_expose_body() {
        let err = TransportError::Status {
            status: 500,
            body: "<html>outage</html>".into(),
        };
        assert_eq!(err.response_body(), Some("<html>outage</html>"));
        assert_eq!(TransportError::Network("x".into()).response_body(), None);
    }
}
