//! Resilient async client for the eLearning REST API.
//!
//! # Overview
//! `ElearningClient` exposes one typed method per API operation. Underneath,
//! requests are plain `HttpRequest` values built by [`endpoints::Endpoints`]
//! and sent through a pluggable [`http::Transport`], so everything above the
//! socket is deterministic and testable with fakes.
//!
//! # Design
//! - Long-running work is submitted once with an `Idempotency-Key` and then
//!   tracked by [`jobs::poll_job`] with capped exponential backoff.
//! - Bearer tokens come from a [`auth::TokenSource`]: a static string or a
//!   supplier such as [`auth::ClientCredentialsResolver`], resolved once per
//!   client.
//! - Time is injected through [`clock::Clock`]; tests drive polling and
//!   retries with [`clock::MockClock`] instead of sleeping.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod auth;
pub mod backoff;
pub mod client;
pub mod clock;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod executor;
pub mod http;
pub mod idempotency;
pub mod interceptor;
pub mod jobs;
pub mod types;
pub mod validate;

#[cfg(test)]
mod testing;

pub use auth::{ClientCredentialsResolver, Credentials, Token, TokenSource, TokenSupplier};
pub use client::ElearningClient;
pub use clock::{Clock, MockClock, SystemClock};
pub use config::ClientConfig;
pub use error::{ApiError, AuthError, Error, JobError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
pub use idempotency::IdempotencyKey;
pub use jobs::PollOptions;
pub use types::*;
