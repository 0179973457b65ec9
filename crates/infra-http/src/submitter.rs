// HTTP Submitter Implementation

use crate::mapping::{map_error_response, map_transport_error, parse_receipt};
use async_trait::async_trait;
use dispatch_core::domain::InvoiceRecord;
use dispatch_core::error::{AppError, Result};
use dispatch_core::port::{CodedError, SubmissionError, SubmissionReceipt, Submitter};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Invoicing API connection settings
#[derive(Debug, Clone)]
pub struct HttpSubmitterConfig {
    /// API base URL, e.g. `https://einvoice.example.com/api`
    pub base_url: String,
    /// Bearer token, if the API requires one
    pub api_token: Option<String>,
    pub timeout: Duration,
}

impl HttpSubmitterConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Request body
#[derive(Serialize)]
struct SubmitRequest<'a> {
    invoice_id: &'a str,
    tenant_id: &'a str,
    document: &'a serde_json::Value,
}

/// Submitter over the invoicing API's JSON endpoint
///
/// Sends the invoice id as `Idempotency-Key`, so an API that honours it
/// drops a replay of an attempt whose response was lost.
pub struct HttpSubmitter {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpSubmitter {
    /// Build the HTTP client
    ///
    /// # Errors
    /// `AppError::Config` if the base URL is empty or the client cannot be built.
    pub fn new(config: HttpSubmitterConfig) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(AppError::Config("invoicing API URL is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/invoices", base),
            api_token: config.api_token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(
        &self,
        invoice: &InvoiceRecord,
    ) -> std::result::Result<SubmissionReceipt, SubmissionError> {
        let body = SubmitRequest {
            invoice_id: &invoice.id,
            tenant_id: &invoice.tenant_id,
            document: &invoice.payload,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", invoice.id.as_str())
            .json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            let err = map_transport_error(&e);
            debug!(invoice_id = %invoice.id, code = %err.code(), error = %e, "Request failed");
            err
        })?;

        let status = response.status();

        if !status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| map_transport_error(&e))?;
            let err = map_error_response(status, &text);
            debug!(
                invoice_id = %invoice.id,
                http_status = status.as_u16(),
                code = %err.code(),
                "Invoicing API refused the request"
            );
            return Err(err);
        }

        // Accepted from here on: a body we cannot read must not turn into a failure
        let receipt = match response.text().await {
            Ok(text) => parse_receipt(&text),
            Err(e) => {
                warn!(
                    invoice_id = %invoice.id,
                    http_status = status.as_u16(),
                    error = %e,
                    "Accepted but the response body could not be read"
                );
                None
            }
        };

        match receipt {
            Some(receipt) => Ok(receipt),
            None => {
                warn!(
                    invoice_id = %invoice.id,
                    http_status = status.as_u16(),
                    "Accepted without a readable receipt"
                );
                Ok(SubmissionReceipt::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the base URL
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{}", addr)
    }

    fn invoice() -> InvoiceRecord {
        InvoiceRecord::new("inv-1", "tenant-a", json!({"total": "10.00"}), 0)
    }

    fn submitter(base_url: String, timeout: Duration) -> HttpSubmitter {
        HttpSubmitter::new(HttpSubmitterConfig::new(base_url).with_timeout(timeout)).unwrap()
    }

    #[test]
    fn test_empty_base_url_is_rejected() {
        assert!(HttpSubmitter::new(HttpSubmitterConfig::new("")).is_err());
    }

    #[test]
    fn test_endpoint_ignores_trailing_slash() {
        let s = HttpSubmitter::new(HttpSubmitterConfig::new("http://api.local/v1/")).unwrap();
        assert_eq!(s.endpoint(), "http://api.local/v1/invoices");
    }

    #[tokio::test]
    async fn test_accepted_invoice_yields_receipt() {
        let url = serve_once("201 Created", r#"{"transaction_id":"tx-77","status":"ACCEPTED"}"#).await;

        let receipt = submitter(url, Duration::from_secs(5))
            .submit(&invoice())
            .await
            .unwrap();

        assert_eq!(receipt.transaction_id.as_deref(), Some("tx-77"));
    }

    #[tokio::test]
    async fn test_truncated_accepted_body_still_counts_as_submitted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            // Promises 500 bytes, sends 22, then hangs up
            let response = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 500\r\n\r\n{\"transaction_id\":\"tx-";
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        let receipt = submitter(format!("http://{}", addr), Duration::from_secs(5))
            .submit(&invoice())
            .await
            .unwrap();

        assert_eq!(receipt, SubmissionReceipt::default());
    }

    #[tokio::test]
    async fn test_structured_rejection() {
        let url = serve_once(
            "422 Unprocessable Entity",
            r#"{"code":"INVALID_INVOICE","message":"missing buyer"}"#,
        )
        .await;

        let err = submitter(url, Duration::from_secs(5))
            .submit(&invoice())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INVALID_INVOICE");
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = submitter(format!("http://{}", addr), Duration::from_secs(5))
            .submit(&invoice())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CONNECTION_ERROR");
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = submitter(format!("http://{}", addr), Duration::from_millis(100))
            .submit(&invoice())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "TIMEOUT");
    }
}
