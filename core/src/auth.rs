//! Bearer-token resolution.
//!
//! # Overview
//! A client is configured with a [`TokenSource`]: either a static token or a
//! [`TokenSupplier`] that is asked once, on first use, and cached for the
//! lifetime of the client. [`ClientCredentialsResolver`] is the supplier for
//! the OAuth2 client-credentials grant:
//!
//! ```text
//! POST {base_url}/api/oauth2/token
//! content-type: application/x-www-form-urlencoded
//!
//! grant_type=client_credentials&scope=..&client_id=..&client_secret=..
//! ```
//!
//! Each attempt is bounded by the configured timeout. Failed attempts are
//! retried after 100ms, 250ms, 625ms, ... (x2.5, no jitter) until
//! `max_retries` attempts have been made; the last failure is returned.
//!
//! # Design
//! The cache is fetch-once: there is no expiry-aware refresh. Concurrent
//! first calls share one fetch through `tokio::sync::OnceCell`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::backoff::next_delay;
use crate::clock::Clock;
use crate::error::{AuthAttemptError, AuthError, Error, Result};
use crate::http::{HttpMethod, HttpRequest, Transport, TransportError};

pub const DEFAULT_BASE_URL: &str = "https://app.genixsuite.com";
pub const DEFAULT_SCOPES: &str = "jobs:read";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
const RETRY_MULTIPLIER: f64 = 2.5;

/// Human explanation for a failed token request status.
pub fn explain_status(status: u16) -> &'static str {
    match status {
        400 => "Bad request. Check client_id/client_secret and grant_type.",
        401 => "Unauthorized. Credentials incorrect or not authorized.",
        403 => "Forbidden. Missing required scopes.",
        404 => "Endpoint not found. Check baseUrl.",
        429 => "Rate limited. Retry after a delay.",
        s if s >= 500 => "Server error. Try again later.",
        _ => "Unexpected response.",
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Validated client-credentials configuration.
#[derive(Clone)]
pub struct Credentials {
    base_url: String,
    client_id: String,
    client_secret: String,
    scopes: BTreeSet<String>,
    timeout: Duration,
    max_retries: u32,
}

impl Credentials {
    pub fn builder(client_id: impl Into<String>, client_secret: impl Into<String>) -> CredentialsBuilder {
        CredentialsBuilder {
            base_url: DEFAULT_BASE_URL.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: parse_scopes(DEFAULT_SCOPES),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Load from the process environment.
    ///
    /// Reads `GENIXSUITE_CLIENT_ID`, `GENIXSUITE_CLIENT_SECRET` (required),
    /// `GENIXSUITE_SCOPES`, `GENIXSUITE_BASE_URL`, `REQUEST_TIMEOUT_MS` and
    /// `MAX_TOKEN_RETRIES`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Credentials::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let missing: Vec<&str> = ["GENIXSUITE_CLIENT_ID", "GENIXSUITE_CLIENT_SECRET"]
            .into_iter()
            .filter(|name| get(*name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!("missing env: {}", missing.join(", "))));
        }

        let mut builder = Self::builder(
            get("GENIXSUITE_CLIENT_ID").unwrap_or_default(),
            get("GENIXSUITE_CLIENT_SECRET").unwrap_or_default(),
        );

        if let Some(base_url) = get("GENIXSUITE_BASE_URL") {
            builder = builder.base_url(base_url);
        }

        if let Some(raw) = lookup("GENIXSUITE_SCOPES") {
            if raw.trim().is_empty() {
                return Err(Error::Config("GENIXSUITE_SCOPES cannot be empty".to_string()));
            }
            builder = builder.scopes(raw.split_whitespace());
        }

        if let Some(raw) = get("REQUEST_TIMEOUT_MS") {
            let ms = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| Error::Config(format!("invalid REQUEST_TIMEOUT_MS {raw:?}: must be > 0 (ms)")))?;
            builder = builder.timeout(Duration::from_millis(ms));
        }

        if let Some(raw) = get("MAX_TOKEN_RETRIES") {
            let retries = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| {
                    Error::Config(format!("invalid MAX_TOKEN_RETRIES {raw:?}: must be a positive integer"))
                })?;
            builder = builder.max_retries(retries);
        }

        builder.build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// Scopes as sent on the wire: space-joined.
    pub fn scope_string(&self) -> String {
        self.scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn token_url(&self) -> String {
        format!("{}/api/oauth2/token", self.base_url)
    }

    /// Form-encoded token request. The body carries the client secret and
    /// must never be logged.
    pub fn token_request(&self) -> HttpRequest {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("scope", &self.scope_string())
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .finish();
        let mut request = HttpRequest::new(HttpMethod::Post, self.token_url());
        request.set_header("content-type", "application/x-www-form-urlencoded");
        request.set_header("accept", "application/json");
        request.body = Some(body);
        request
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

pub struct CredentialsBuilder {
    base_url: String,
    client_id: String,
    client_secret: String,
    scopes: BTreeSet<String>,
    timeout: Duration,
    max_retries: u32,
}

impl CredentialsBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::<String>::into).filter(|s| !s.is_empty()).collect();
        self
    }

    /// Per-attempt deadline for the token request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total number of attempts, including the first.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn build(self) -> Result<Credentials> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("client_id cannot be empty".to_string()));
        }
        if self.client_secret.is_empty() {
            return Err(Error::Config("client_secret cannot be empty".to_string()));
        }
        if self.scopes.is_empty() {
            return Err(Error::Config("at least one scope is required".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be > 0".to_string()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be a positive integer".to_string()));
        }
        let base_url = self.base_url.trim_end_matches('/').to_string();
        url::Url::parse(&base_url).map_err(|e| Error::Config(format!("invalid base URL {base_url:?}: {e}")))?;

        Ok(Credentials {
            base_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            scopes: self.scopes,
            timeout: self.timeout,
            max_retries: self.max_retries,
        })
    }
}

fn parse_scopes(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Claims read from a JWT access token. Signatures are not verified; this is
/// diagnostic information only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
}

impl TokenClaims {
    pub fn scopes(&self) -> BTreeSet<&str> {
        self.scope.as_deref().map(|s| s.split_whitespace().collect()).unwrap_or_default()
    }

    /// Seconds until expiry relative to `now` (unix seconds). Negative once
    /// expired.
    pub fn expires_in(&self, now: i64) -> Option<i64> {
        self.exp.map(|exp| exp - now)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    access_token: String,
    claims: Option<TokenClaims>,
}

impl Token {
    pub fn new(access_token: impl Into<String>) -> Self {
        let access_token = access_token.into();
        let claims = decode_claims(&access_token);
        Self { access_token, claims }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn claims(&self) -> Option<&TokenClaims> {
        self.claims.as_ref()
    }

    pub fn into_access_token(self) -> String {
        self.access_token
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}

fn decode_claims(token: &str) -> Option<TokenClaims> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn parse_token_response(body: &str) -> std::result::Result<Token, AuthAttemptError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|_| AuthAttemptError::Malformed)?;
    value
        .get("access_token")
        .and_then(serde_json::Value::as_str)
        .map(Token::new)
        .ok_or(AuthAttemptError::Malformed)
}

// ---------------------------------------------------------------------------
// Token sources
// ---------------------------------------------------------------------------

/// Asynchronously produces a bearer token.
#[async_trait]
pub trait TokenSupplier: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// Where a client gets its bearer token from.
#[derive(Clone)]
pub enum TokenSource {
    Static(String),
    /// Asked once on first use; the result is cached per client.
    Supplier(Arc<dyn TokenSupplier>),
}

impl TokenSource {
    pub fn supplier(supplier: impl TokenSupplier + 'static) -> Self {
        TokenSource::Supplier(Arc::new(supplier))
    }
}

impl From<String> for TokenSource {
    fn from(token: String) -> Self {
        TokenSource::Static(token)
    }
}

impl From<&str> for TokenSource {
    fn from(token: &str) -> Self {
        TokenSource::Static(token.to_string())
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("Static(<redacted>)"),
            TokenSource::Supplier(_) => f.write_str("Supplier(..)"),
        }
    }
}

/// A token source plus the per-client cache for supplier results.
pub(crate) struct TokenCache {
    source: TokenSource,
    cached: OnceCell<String>,
}

impl TokenCache {
    pub(crate) fn new(source: TokenSource) -> Self {
        Self { source, cached: OnceCell::new() }
    }

    pub(crate) async fn bearer(&self) -> Result<String> {
        match &self.source {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Supplier(supplier) => self.cached.get_or_try_init(|| supplier.token()).await.cloned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client-credentials exchange
// ---------------------------------------------------------------------------

pub struct ClientCredentialsResolver {
    credentials: Credentials,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    max_delay: Option<Duration>,
}

impl ClientCredentialsResolver {
    pub fn new(credentials: Credentials, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self { credentials, transport, clock, max_delay: None }
    }

    /// Cap the retry delay. Uncapped by default.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Run the exchange, retrying failed attempts with backoff.
    pub async fn fetch_token(&self) -> std::result::Result<Token, AuthError> {
        let request = self.credentials.token_request();
        let max_retries = self.credentials.max_retries;
        debug!(url = %request.url, scopes = %self.credentials.scope_string(), "requesting token");

        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            match self.attempt(&request).await {
                Ok(token) => {
                    debug!(attempt, "token acquired");
                    return Ok(token);
                }
                Err(last) => {
                    warn!(attempt, max_retries, error = %last, "token attempt failed");
                    if attempt >= max_retries {
                        return Err(AuthError { attempts: attempt, last });
                    }
                    self.clock.sleep(delay).await;
                    delay = next_delay(delay, RETRY_MULTIPLIER, self.max_delay);
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, request: &HttpRequest) -> std::result::Result<Token, AuthAttemptError> {
        let timeout = self.credentials.timeout;
        let response = match tokio::time::timeout(timeout, self.transport.send(request, timeout)).await {
            Ok(Err(TransportError::Timeout(_))) | Err(_) => return Err(AuthAttemptError::Timeout(timeout)),
            Ok(result) => result?,
        };

        if !response.is_success() {
            return Err(AuthAttemptError::Status {
                status: response.status,
                explanation: explain_status(response.status),
                body: response.body,
            });
        }
        parse_token_response(&response.body)
    }
}

#[async_trait]
impl TokenSupplier for ClientCredentialsResolver {
    async fn token(&self) -> Result<String> {
        Ok(self.fetch_token().await?.into_access_token())
    }
}
