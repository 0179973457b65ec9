// Transport signals -> SubmissionError
//
// The only place that knows what the invoicing API's HTTP answers mean.

use dispatch_core::port::{codes, SubmissionError, SubmissionReceipt};
use reqwest::StatusCode;
use serde::Deserialize;

/// Structured error body returned by the invoicing API
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Success body returned by the invoicing API
#[derive(Debug, Deserialize)]
struct ApiReceiptBody {
    #[serde(alias = "transactionId")]
    transaction_id: Option<String>,
    status: Option<String>,
}

/// Map a non-2xx response
///
/// - 429 -> RATE_LIMIT, 503 -> SERVICE_UNAVAILABLE
/// - other 5xx -> TEMPORARY_ERROR
/// - 4xx with `{code, message}` -> the API's own code
/// - 4xx without a code -> derived from the status (401/403 auth, 409 duplicate, ...)
pub(crate) fn map_error_response(status: StatusCode, body: &str) -> SubmissionError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| summarize(status, body));

    if status == StatusCode::TOO_MANY_REQUESTS {
        return SubmissionError::RateLimited(message);
    }
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return SubmissionError::ServiceUnavailable(message);
    }
    if status.is_server_error() {
        return SubmissionError::rejected(codes::TEMPORARY_ERROR, message);
    }

    if status.is_client_error() {
        if let Some(code) = parsed.and_then(|b| b.code).filter(|c| !c.is_empty()) {
            return SubmissionError::rejected(code, message);
        }
        return match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                SubmissionError::rejected(codes::AUTH_ERROR, message)
            }
            StatusCode::CONFLICT => SubmissionError::rejected(codes::DUPLICATE_INVOICE, message),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                SubmissionError::rejected(codes::VALIDATION_ERROR, message)
            }
            StatusCode::REQUEST_TIMEOUT => SubmissionError::Timeout(message),
            _ => SubmissionError::Unknown(message),
        };
    }

    // 1xx/3xx: nothing we asked for
    SubmissionError::Unknown(message)
}

/// Map a request that never produced a response
pub(crate) fn map_transport_error(err: &reqwest::Error) -> SubmissionError {
    if err.is_timeout() {
        SubmissionError::Timeout(err.to_string())
    } else if err.is_connect() {
        SubmissionError::Connection(err.to_string())
    } else {
        SubmissionError::Unknown(err.to_string())
    }
}

/// Parse a 2xx body
///
/// The API already accepted the invoice, so an unreadable body still counts as
/// success (without a transaction id) rather than a failure that would be retried.
pub(crate) fn parse_receipt(body: &str) -> Option<SubmissionReceipt> {
    let parsed: ApiReceiptBody = serde_json::from_str(body).ok()?;
    Some(SubmissionReceipt {
        transaction_id: parsed.transaction_id,
        status: parsed.status,
    })
}

fn summarize(status: StatusCode, body: &str) -> String {
    const MAX_BODY: usize = 200;
    let body = body.trim();
    if body.is_empty() {
        return format!("HTTP {}", status);
    }
    let cut: String = body.chars().take(MAX_BODY).collect();
    format!("HTTP {}: {}", status, cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::port::CodedError;

    fn code_of(status: u16, body: &str) -> String {
        let status = StatusCode::from_u16(status).unwrap();
        map_error_response(status, body).code().to_string()
    }

    #[test]
    fn test_transient_statuses() {
        assert_eq!(code_of(429, ""), "RATE_LIMIT");
        assert_eq!(code_of(503, "<html>down</html>"), "SERVICE_UNAVAILABLE");
        assert_eq!(code_of(500, ""), "TEMPORARY_ERROR");
        assert_eq!(code_of(502, r#"{"code":"INVALID_TAX_ID"}"#), "TEMPORARY_ERROR");
        assert_eq!(code_of(408, ""), "TIMEOUT");
    }

    #[test]
    fn test_structured_code_wins_for_client_errors() {
        let err = map_error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"code":"INVALID_TAX_ID","message":"checksum mismatch"}"#,
        );
        assert_eq!(err, SubmissionError::rejected("INVALID_TAX_ID", "checksum mismatch"));
    }

    #[test]
    fn test_client_errors_without_code() {
        assert_eq!(code_of(401, ""), "AUTH_ERROR");
        assert_eq!(code_of(403, "forbidden"), "AUTH_ERROR");
        assert_eq!(code_of(409, ""), "DUPLICATE_INVOICE");
        assert_eq!(code_of(400, "not json"), "VALIDATION_ERROR");
        assert_eq!(code_of(404, ""), "UNKNOWN_ERROR");
    }

    #[test]
    fn test_message_falls_back_to_truncated_body() {
        let body = "x".repeat(1_000);
        let err = map_error_response(StatusCode::INTERNAL_SERVER_ERROR, &body);
        assert!(err.message().starts_with("HTTP 500"));
        assert!(err.message().len() < 300);
    }

    #[test]
    fn test_parse_receipt_accepts_both_spellings() {
        let snake = parse_receipt(r#"{"transaction_id":"tx-1","status":"ACCEPTED"}"#).unwrap();
        assert_eq!(snake.transaction_id.as_deref(), Some("tx-1"));

        let camel = parse_receipt(r#"{"transactionId":"tx-2"}"#).unwrap();
        assert_eq!(camel.transaction_id.as_deref(), Some("tx-2"));
        assert!(camel.status.is_none());

        assert!(parse_receipt("OK").is_none());
    }
}
