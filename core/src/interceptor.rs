//! Request/response interceptors and header redaction.
//!
//! Request interceptors run in order just before a request is sent and may
//! rewrite its URL or headers. Response interceptors run in order after a
//! response arrives and only observe it. Closures of the right shape
//! implement both traits, so simple hooks need no boilerplate.

use tracing::info;

use crate::http::{HttpRequest, HttpResponse};

/// Header names whose values never appear in logs (compared lowercase).
pub const SENSITIVE_HEADERS: &[&str] =
    &["authorization", "proxy-authorization", "x-api-key", "client_secret", "cookie", "set-cookie"];

pub const REDACTED: &str = "<redacted>";

pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, request: &mut HttpRequest);
}

impl<F> RequestInterceptor for F
where
    F: Fn(&mut HttpRequest) + Send + Sync,
{
    fn intercept(&self, request: &mut HttpRequest) {
        self(request)
    }
}

pub trait ResponseInterceptor: Send + Sync {
    fn observe(&self, request: &HttpRequest, response: &HttpResponse);
}

impl<F> ResponseInterceptor for F
where
    F: Fn(&HttpRequest, &HttpResponse) + Send + Sync,
{
    fn observe(&self, request: &HttpRequest, response: &HttpResponse) {
        self(request, response)
    }
}

pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Copy of `headers` with sensitive values replaced by `<redacted>`.
pub fn redact_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| {
            let value = if is_sensitive(k) { REDACTED.to_string() } else { v.clone() };
            (k.clone(), value)
        })
        .collect()
}

/// One-line log rendering of a request. Bodies are omitted.
pub fn describe_request(request: &HttpRequest) -> String {
    format!("{} {} headers={:?}", request.method, request.url, redact_headers(&request.headers))
}

/// One-line log rendering of a response. Bodies are omitted.
pub fn describe_response(request: &HttpRequest, response: &HttpResponse) -> String {
    format!(
        "{} {} {} headers={:?}",
        response.status,
        request.method,
        request.url,
        redact_headers(&response.headers)
    )
}

/// Verbose-mode request logger.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogger;

impl RequestInterceptor for RequestLogger {
    fn intercept(&self, request: &mut HttpRequest) {
        info!(target: "elearning_sdk::request", "{}", describe_request(request));
    }
}

/// Verbose-mode response logger.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseLogger;

impl ResponseInterceptor for ResponseLogger {
    fn observe(&self, request: &HttpRequest, response: &HttpResponse) {
        info!(target: "elearning_sdk::response", "{}", describe_response(request, response));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;

    fn request_with_secrets() -> HttpRequest {
        let mut req = HttpRequest::new(HttpMethod::Post, "http://api/api/v1/exports");
        req.set_header("Authorization", "Bearer tok-123");
        req.set_header("Proxy-Authorization", "Basic cHJveHk=");
        req.set_header("X-API-Key", "key-456");
        req.set_header("Idempotency-Key", "idem-1");
        req
    }

    #[test]
    fn redaction_is_case_insensitive() {
        let headers = vec![
            ("AUTHORIZATION".to_string(), "Bearer x".to_string()),
            ("X-Api-Key".to_string(), "k".to_string()),
            ("accept".to_string(), "application/json".to_string()),
        ];
        let redacted = redact_headers(&headers);
        assert_eq!(redacted[0].1, REDACTED);
        assert_eq!(redacted[1].1, REDACTED);
        assert_eq!(redacted[2].1, "application/json");
    }

    #[test]
    fn request_log_never_contains_secret_values() {
        let line = describe_request(&request_with_secrets());
        for secret in ["tok-123", "cHJveHk=", "key-456"] {
            assert!(!line.contains(secret), "{line}");
        }
        assert!(line.contains("idem-1"));
        assert!(line.starts_with("POST http://api/api/v1/exports"));
    }

    #[test]
    fn response_log_never_contains_secret_values() {
        let response = HttpResponse::new(200, "{}")
            .with_header("set-cookie", "session=abc")
            .with_header("x-api-key", "echoed-key");
        let line = describe_response(&request_with_secrets(), &response);
        assert!(!line.contains("session=abc"));
        assert!(!line.contains("echoed-key"));
        assert!(line.starts_with("200 POST"));
    }

    #[test]
    fn closures_are_interceptors() {
        let rewrite = |req: &mut HttpRequest| req.set_header("x-tenant", "acme");
        let mut req = HttpRequest::new(HttpMethod::Get, "http://api/x");
        RequestInterceptor::intercept(&rewrite, &mut req);
        assert_eq!(req.header("x-tenant"), Some("acme"));
    }
}
