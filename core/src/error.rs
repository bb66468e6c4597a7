//! Error types for the eLearning API client.
//!
//! # Design
//! One variant per failure class a caller can act on differently:
//! credential exchange (`Auth`), non-2xx answers (`Api`), response shape
//! mismatches (`Validation`), caller precondition violations (`Usage`),
//! terminal failed/canceled jobs (`Job`) and deadlines (`JobTimeout`,
//! `RequestTimeout`). Only the credential exchange retries internally;
//! everything else propagates to the caller as-is.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::http::{HttpResponse, TransportError};
use crate::types::{Job, JobStatus, Problem};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by `ElearningClient` and its building blocks.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The response decoded but did not match the expected schema.
    #[error("response validation failed for {context}: {message}")]
    Validation { context: &'static str, message: String },

    /// The caller violated a precondition; nothing was sent.
    #[error("invalid usage: {0}")]
    Usage(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("job {job_id} timed out after {}ms", .timeout.as_millis())]
    JobTimeout { job_id: String, timeout: Duration },

    #[error("request to {url} timed out after {}ms", .timeout.as_millis())]
    RequestTimeout { url: String, timeout: Duration },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("deserialization failed for {context}: {message}")]
    Deserialization { context: &'static str, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The API error, if this is one.
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            _ => None,
        }
    }
}

/// A non-2xx HTTP response.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    /// Raw response body.
    pub body: String,
    pub headers: Vec<(String, String)>,
    /// The body parsed as RFC 7807 problem details, when it is one.
    pub problem: Option<Problem>,
}

impl ApiError {
    pub fn from_response(url: impl Into<String>, response: &HttpResponse) -> Self {
        Self {
            url: url.into(),
            status: response.status,
            status_text: response.status_text.clone(),
            body: response.body.clone(),
            headers: response.headers.clone(),
            problem: Problem::parse(&response.body),
        }
    }

    /// `409 Conflict`, e.g. an idempotency key reused with a different body.
    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Correlation id from the problem body, falling back to the
    /// `x-correlation-id` response header.
    pub fn correlation_id(&self) -> Option<&str> {
        self.problem
            .as_ref()
            .and_then(|p| p.correlation_id.as_deref())
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("x-correlation-id"))
                    .map(|(_, v)| v.as_str())
            })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {} {} from {}", self.status, self.status_text, self.url)?;
        match &self.problem {
            Some(p) => {
                write!(f, ": {}", p.title)?;
                if let Some(detail) = &p.detail {
                    write!(f, " ({detail})")?;
                }
            }
            None if !self.body.is_empty() => write!(f, ": {}", truncate(&self.body, 200))?,
            None => {}
        }
        if let Some(id) = self.correlation_id() {
            write!(f, " [correlation id {id}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Why a single token-exchange attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthAttemptError {
    #[error("token request failed {status}: {explanation}{}", body_suffix(.body))]
    Status { status: u16, explanation: &'static str, body: String },

    #[error("token response malformed; expected {{ access_token: string }}")]
    Malformed,

    #[error("token request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" | {}", truncate(body, 200))
    }
}

/// The client-credentials exchange failed on every attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("token exchange failed after {attempts} attempt(s): {last}")]
pub struct AuthError {
    pub attempts: u32,
    /// The failure of the final attempt.
    #[source]
    pub last: AuthAttemptError,
}

/// A job reached `failed` or `canceled` while the caller asked to treat
/// that as an error.
#[derive(Debug, Clone, Error)]
#[error("job {job_id} {status}: {detail}")]
pub struct JobError {
    pub job_id: String,
    pub status: JobStatus,
    pub detail: String,
    /// The terminal job as last observed.
    pub job: Box<Job>,
}

impl JobError {
    pub fn from_job(job: Job) -> Self {
        let detail = job
            .error
            .as_ref()
            .map(|p| p.detail.clone().unwrap_or_else(|| p.title.clone()))
            .unwrap_or_else(|| "Unknown error".to_string());
        Self { job_id: job.id.clone(), status: job.status, detail, job: Box::new(job) }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.job.error.as_ref().and_then(|p| p.correlation_id.as_deref())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display_includes_problem_and_correlation() {
        let response = HttpResponse::new(
            409,
            r#"{"title":"Idempotency conflict","status":409,"detail":"body differs","correlationId":"corr-9"}"#,
        );
        let err = ApiError::from_response("http://api/x", &response);
        assert!(err.is_conflict());
        assert_eq!(err.correlation_id(), Some("corr-9"));
        let text = err.to_string();
        assert!(text.contains("HTTP 409 Conflict"));
        assert!(text.contains("Idempotency conflict (body differs)"));
        assert!(text.contains("corr-9"));
    }

    #[test]
    fn api_error_tolerates_arbitrary_bodies() {
        let response = HttpResponse::new(502, "<html>bad gateway</html>").with_header("X-Correlation-Id", "hdr-1");
        let err = ApiError::from_response("http://api/x", &response);
        assert!(err.problem.is_none());
        assert_eq!(err.correlation_id(), Some("hdr-1"));
        assert!(err.to_string().contains("bad gateway"));
    }

    #[test]
    fn auth_error_reports_last_attempt() {
        let err = AuthError {
            attempts: 3,
            last: AuthAttemptError::Status {
                status: 503,
                explanation: "Server error. Try again later.",
                body: String::new(),
            },
        };
        assert_eq!(
            err.to_string(),
            "token exchange failed after 3 attempt(s): token request failed 503: Server error. Try again later."
        );
    }

    #[test]
    fn job_error_falls_back_to_problem_title() {
        let job: Job = serde_json::from_str(
            r#"{"id":"j1","status":"canceled","submittedAt":"t","error":{"title":"Canceled by user","status":409}}"#,
        )
        .unwrap();
        let err = JobError::from_job(job);
        assert_eq!(err.to_string(), "job j1 canceled: Canceled by user");
    }

    #[test]
    fn job_error_without_problem_is_unknown() {
        let job: Job = serde_json::from_str(r#"{"id":"j2","status":"failed","submittedAt":"t"}"#).unwrap();
        assert_eq!(JobError::from_job(job).detail, "Unknown error");
    }
}
