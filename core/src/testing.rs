//! Scripted `Transport` fake shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::http::{HttpRequest, HttpResponse, Transport, TransportError};

pub(crate) enum Step {
    Respond(HttpResponse),
    Fail(TransportError),
    /// Never answer; only the caller's deadline ends the call.
    Hang,
}

/// Replays queued steps in order and records every request it receives.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self { steps: Mutex::new(steps.into_iter().collect()), requests: Mutex::new(Vec::new()) }
    }

    pub(crate) fn json(status: u16, body: serde_json::Value) -> Step {
        Step::Respond(HttpResponse::new(status, body.to_string()).with_header("content-type", "application/json"))
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest, _timeout: Duration) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => std::future::pending().await,
            None => panic!("unexpected request to {}", request.url),
        }
    }
}
