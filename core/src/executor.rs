//! Issues one authenticated HTTP call.
//!
//! For every request the executor resolves the bearer token, attaches the
//! idempotency key when one is given, runs the request interceptors in
//! order, sends the request under a hard deadline, runs the response
//! interceptors in order and classifies the status. Nothing is retried here;
//! callers own submission retries and protect them with idempotency keys.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::auth::TokenCache;
use crate::config::ClientConfig;
use crate::error::{ApiError, Error, Result};
use crate::http::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::idempotency::IdempotencyKey;
use crate::interceptor::{RequestInterceptor, ResponseInterceptor};

pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    token: TokenCache,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    timeout: Duration,
}

impl RequestExecutor {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            transport: config.transport.clone(),
            token: TokenCache::new(config.token.clone()),
            request_interceptors: config.request_interceptors.clone(),
            response_interceptors: config.response_interceptors.clone(),
            timeout: config.request_timeout,
        }
    }

    /// Send `request` and return the response when its status is 2xx, or
    /// 304 for a conditional (`If-None-Match`) request.
    pub async fn execute(&self, mut request: HttpRequest, idempotency_key: Option<&IdempotencyKey>) -> Result<HttpResponse> {
        let token = self.token.bearer().await?;
        request.set_header("authorization", format!("Bearer {token}"));
        request.set_header("accept", "application/json");
        if let Some(key) = idempotency_key {
            request.set_header("idempotency-key", key.as_str());
        }

        for interceptor in &self.request_interceptors {
            interceptor.intercept(&mut request);
        }

        debug!(method = %request.method, url = %request.url, "sending request");
        let outcome = tokio::time::timeout(self.timeout, self.transport.send(&request, self.timeout)).await;
        // The transport enforces the same deadline, so either side may fire first.
        let response = match outcome {
            Ok(Err(TransportError::Timeout(_))) | Err(_) => {
                return Err(Error::RequestTimeout { url: request.url, timeout: self.timeout })
            }
            Ok(result) => result?,
        };
        debug!(method = %request.method, url = %request.url, status = response.status, "received response");

        for interceptor in &self.response_interceptors {
            interceptor.observe(&request, &response);
        }

        let not_modified = response.status == 304 && request.header("if-none-match").is_some();
        if response.is_success() || not_modified {
            Ok(response)
        } else {
            Err(ApiError::from_response(request.url, &response).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::config::ClientConfigBuilder;
    use crate::http::{HttpMethod, TransportError};
    use crate::testing::{ScriptedTransport, Step};

    fn executor(
        transport: &Arc<ScriptedTransport>,
        build: impl FnOnce(ClientConfigBuilder) -> ClientConfigBuilder,
    ) -> RequestExecutor {
        let builder = ClientConfig::builder("http://api.local", "tok-abc").transport(transport.clone());
        RequestExecutor::new(&build(builder).build().unwrap())
    }

    #[tokio::test]
    async fn attaches_bearer_and_idempotency_headers() {
        let transport = Arc::new(ScriptedTransport::new([ScriptedTransport::json(200, json!({}))]));
        let exec = executor(&transport, |b| b);
        let key = IdempotencyKey::new("idem-7");

        exec.execute(HttpRequest::new(HttpMethod::Post, "http://api.local/api/v1/uploads"), Some(&key))
            .await
            .unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.header("authorization"), Some("Bearer tok-abc"));
        assert_eq!(sent.header("idempotency-key"), Some("idem-7"));
    }

    #[tokio::test]
    async fn no_idempotency_header_without_key() {
        let transport = Arc::new(ScriptedTransport::new([ScriptedTransport::json(200, json!({}))]));
        executor(&transport, |b| b)
            .execute(HttpRequest::new(HttpMethod::Get, "http://api.local/api/v1/jobs/j"), None)
            .await
            .unwrap();
        assert!(transport.requests()[0].header("idempotency-key").is_none());
    }

    #[tokio::test]
    async fn interceptors_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (s1, s2, s3) = (seen.clone(), seen.clone(), seen.clone());
        let transport = Arc::new(ScriptedTransport::new([ScriptedTransport::json(200, json!({}))]));
        let exec = executor(&transport, move |b| {
            b.request_interceptor(move |req: &mut HttpRequest| {
                s1.lock().unwrap().push("first");
                req.url = req.url.replace("api.local", "gateway.local");
            })
            .request_interceptor(move |req: &mut HttpRequest| {
                s2.lock().unwrap().push(if req.url.contains("gateway") { "second-saw-rewrite" } else { "second" });
            })
            .response_interceptor(move |_: &HttpRequest, resp: &HttpResponse| {
                s3.lock().unwrap().push(if resp.status == 200 { "response" } else { "?" });
            })
        });

        exec.execute(HttpRequest::new(HttpMethod::Get, "http://api.local/health"), None).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second-saw-rewrite", "response"]);
        assert_eq!(transport.requests()[0].url, "http://gateway.local/health");
    }

    #[tokio::test]
    async fn non_2xx_becomes_api_error_with_problem() {
        let transport = Arc::new(ScriptedTransport::new([ScriptedTransport::json(
            409,
            json!({"title": "Idempotency key reuse", "status": 409, "correlationId": "c-42"}),
        )]));
        let err = executor(&transport, |b| b)
            .execute(HttpRequest::new(HttpMethod::Post, "http://api.local/api/v1/exports"), None)
            .await
            .unwrap_err();

        let api = err.as_api().unwrap();
        assert!(api.is_conflict());
        assert_eq!(api.url, "http://api.local/api/v1/exports");
        assert_eq!(api.correlation_id(), Some("c-42"));
        assert_eq!(api.problem.as_ref().unwrap().title, "Idempotency key reuse");
    }

    #[tokio::test]
    async fn not_modified_passes_only_for_conditional_requests() {
        let transport = Arc::new(ScriptedTransport::new([
            Step::Respond(HttpResponse::new(304, "")),
            Step::Respond(HttpResponse::new(304, "")),
        ]));
        let exec = executor(&transport, |b| b);

        let mut conditional = HttpRequest::new(HttpMethod::Get, "http://api.local/api/v1/jobs/j/artifacts");
        conditional.set_header("if-none-match", "\"v1\"");
        assert_eq!(exec.execute(conditional, None).await.unwrap().status, 304);

        let plain = HttpRequest::new(HttpMethod::Get, "http://api.local/api/v1/jobs/j/artifacts");
        assert!(matches!(exec.execute(plain, None).await, Err(Error::Api(ref e)) if e.status == 304));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_times_out() {
        let transport = Arc::new(ScriptedTransport::new([Step::Hang]));
        let exec = executor(&transport, |b| b.request_timeout(Duration::from_secs(2)));

        let err = exec
            .execute(HttpRequest::new(HttpMethod::Get, "http://api.local/api/v1/jobs/j"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { timeout, .. } if timeout == Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn transport_failures_propagate() {
        let transport = Arc::new(ScriptedTransport::new([Step::Fail(TransportError::Connect("refused".into()))]));
        let err = executor(&transport, |b| b)
            .execute(HttpRequest::new(HttpMethod::Get, "http://api.local/health"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn transport_deadline_is_a_request_timeout() {
        let transport = Arc::new(ScriptedTransport::new([Step::Fail(TransportError::Timeout(Duration::from_secs(2)))]));
        let exec = executor(&transport, |b| b.request_timeout(Duration::from_secs(2)));

        let err = exec
            .execute(HttpRequest::new(HttpMethod::Get, "http://api.local/api/v1/jobs/j"), None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::RequestTimeout { ref url, timeout } if url.ends_with("/jobs/j") && timeout == Duration::from_secs(2)),
            "unexpected error: {err:?}"
        );
    }
}
