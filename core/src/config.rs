//! Client configuration.
//!
//! Every `ElearningClient` owns its configuration; nothing is process-global,
//! so several independently configured clients can coexist.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenSource;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::http::{ReqwestTransport, Transport};
use crate::interceptor::{RequestInterceptor, RequestLogger, ResponseInterceptor, ResponseLogger};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ClientConfig {
    pub(crate) base_url: String,
    pub(crate) token: TokenSource,
    pub(crate) verbose: bool,
    pub(crate) validate_responses: bool,
    pub(crate) request_timeout: Duration,
    pub(crate) request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    pub(crate) response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl ClientConfig {
    pub fn builder(base_url: impl Into<String>, token: impl Into<TokenSource>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            base_url: base_url.into(),
            token: token.into(),
            verbose: false,
            validate_responses: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
            transport: None,
            clock: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn validate_responses(&self) -> bool {
        self.validate_responses
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token)
            .field("verbose", &self.verbose)
            .field("validate_responses", &self.validate_responses)
            .field("request_timeout", &self.request_timeout)
            .field("request_interceptors", &self.request_interceptors.len())
            .field("response_interceptors", &self.response_interceptors.len())
            .finish_non_exhaustive()
    }
}

pub struct ClientConfigBuilder {
    base_url: String,
    token: TokenSource,
    verbose: bool,
    validate_responses: bool,
    request_timeout: Duration,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ClientConfigBuilder {
    /// Log every request and response (headers redacted) through `tracing`.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check decoded responses against their schema rules.
    pub fn validate_responses(mut self, validate: bool) -> Self {
        self.validate_responses = validate;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn request_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.request_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn response_interceptor(mut self, interceptor: impl ResponseInterceptor + 'static) -> Self {
        self.response_interceptors.push(Arc::new(interceptor));
        self
    }

    /// Defaults to [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        url::Url::parse(&base_url).map_err(|e| Error::Config(format!("invalid base URL {base_url:?}: {e}")))?;
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be > 0".to_string()));
        }

        let mut request_interceptors = self.request_interceptors;
        let mut response_interceptors = self.response_interceptors;
        if self.verbose {
            request_interceptors.push(Arc::new(RequestLogger));
            response_interceptors.push(Arc::new(ResponseLogger));
        }

        Ok(ClientConfig {
            base_url,
            token: self.token,
            verbose: self.verbose,
            validate_responses: self.validate_responses,
            request_timeout: self.request_timeout,
            request_interceptors,
            response_interceptors,
            transport: self.transport.unwrap_or_else(|| Arc::new(ReqwestTransport::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        })
    }
}
