//! Outbound HTTP seam.
//!
//! Every network call the engine makes goes through [`HttpClient`], so the sync,
//! upload and telemetry pipelines can be driven by a scripted client in tests.

use std::fmt;
use std::time::Duration;

use http::{Method, StatusCode};
use thiserror::Error;

use crate::util::compact_text;

/// Failures that prevented a response from being received.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid outbound request: {0}")]
    InvalidRequest(String),
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
}

/// Request body variants the engine sends.
#[derive(Clone, PartialEq, Eq)]
pub enum OutboundBody {
    Empty,
    Bytes {
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
    /// Single-part `multipart/form-data` upload.
    Multipart {
        field: String,
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

impl fmt::Debug for OutboundBody {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => formatter.write_str("Empty"),
            Self::Bytes {
                content_type,
                bytes,
            } => formatter
                .debug_struct("Bytes")
                .field("content_type", content_type)
                .field("len", &bytes.len())
                .finish(),
            Self::Multipart {
                field,
                file_name,
                content_type,
                bytes,
            } => formatter
                .debug_struct("Multipart")
                .field("field", field)
                .field("file_name", file_name)
                .field("content_type", content_type)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// A request about to leave the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: OutboundBody,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: OutboundBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: OutboundBody) -> Self {
        self.body = body;
        self
    }

    /// URL without its query string, safe to log.
    pub fn redacted_url(&self) -> &str {
        self.url.split('?').next().unwrap_or_default()
    }
}

/// A response received from the backend, buffered in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl InboundResponse {
    pub const fn new(status: StatusCode, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// JSON response with a matching content type.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: value.to_string().into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn status_text(&self) -> String {
        self.status
            .canonical_reason()
            .unwrap_or_default()
            .to_string()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Short body excerpt for logs and error messages.
    pub fn body_excerpt(&self) -> String {
        compact_text(&String::from_utf8_lossy(&self.body))
    }
}

/// Executes outbound requests.
#[allow(async_fn_in_trait)]
pub trait HttpClient {
    /// Send a request. Any HTTP status is a response; only failures to
    /// reach the backend are errors.
    async fn execute(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError>;
}

/// `reqwest`-backed client used outside tests.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn build(&self, request: OutboundRequest) -> Result<reqwest::Request, TransportError> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in request.headers {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(name, value);
        }

        builder = match request.body {
            OutboundBody::Empty => builder,
            OutboundBody::Bytes {
                content_type,
                bytes,
            } => {
                if let Some(content_type) = content_type {
                    builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
                }
                builder.body(bytes)
            }
            OutboundBody::Multipart {
                field,
                file_name,
                content_type,
                bytes,
            } => {
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&content_type)
                    .map_err(|error| {
                        TransportError::InvalidRequest(format!(
                            "invalid upload content type {content_type}: {error}"
                        ))
                    })?;
                builder.multipart(reqwest::multipart::Form::new().part(field, part))
            }
        };

        Ok(builder.build()?)
    }
}

impl HttpClient for ReqwestClient {
    async fn execute(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError> {
        let method = request.method.clone();
        let target = request.redacted_url().to_string();
        let request = self.build(request)?;

        let response = self.client.execute(request).await.map_err(|error| {
            tracing::warn!("{method} {target} failed: {error}");
            if error.is_connect() || error.is_timeout() {
                TransportError::Unreachable(error.to_string())
            } else {
                TransportError::Http(error)
            }
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();
        tracing::debug!("{method} {target} -> {status}");

        Ok(InboundResponse {
            status,
            headers,
            body,
        })
    }
}
