//! Scripted HTTP client shared by the pipeline tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use http::StatusCode;
use serde_json::Value;

use crate::transport::{HttpClient, InboundResponse, OutboundRequest, TransportError};

enum Scripted {
    Respond(InboundResponse),
    Fail(String),
}

/// Replays queued responses in order and records every request it sees.
///
/// An exhausted script behaves like an unreachable backend.
#[derive(Clone, Default)]
pub struct ScriptedClient {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<OutboundRequest>>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, response: InboundResponse) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Respond(response));
        self
    }

    pub fn respond_json(&self, status: u16, body: Value) -> &Self {
        self.respond(InboundResponse::json(
            StatusCode::from_u16(status).unwrap(),
            &body,
        ))
    }

    pub fn fail(&self, message: &str) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|request| request.url).collect()
    }
}

impl HttpClient for ScriptedClient {
    async fn execute(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(TransportError::Unreachable(message)),
            None => Err(TransportError::Unreachable("script exhausted".to_string())),
        }
    }
}
