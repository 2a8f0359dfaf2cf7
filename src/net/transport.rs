//! HTTP transport for operations.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{Failure, NetworkFailure};
use crate::net::client::{HttpClient, REQUEST_TIMEOUT};
use crate::net::traits::Transport;
use crate::net::wire::{RequestEnvelope, ResponseEnvelope};
use crate::operation::Variables;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Markers in an error chain that point at the link rather than the server.
const CONNECTIVITY_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "dns error",
    "failed to lookup address",
    "network is unreachable",
    "host unreachable",
    "cors",
];

/// An operation after the auth stage, ready to send.
#[derive(Clone, PartialEq)]
pub struct OutgoingRequest {
    pub name: String,
    pub document: Option<String>,
    pub variables: Variables,
    /// Full `Authorization` header value, if a credential is attached.
    pub bearer: Option<String>,
    pub request_id: Uuid,
}

impl OutgoingRequest {
    /// Request without any credential.
    pub fn anonymous(name: impl Into<String>, document: Option<String>, variables: Variables) -> Self {
        Self {
            name: name.into(),
            document,
            variables,
            bearer: None,
            request_id: Uuid::new_v4(),
        }
    }

    /// Request carrying `bearer` as its `Authorization` header.
    pub fn authenticated(
        name: impl Into<String>,
        document: Option<String>,
        variables: Variables,
        bearer: String,
    ) -> Self {
        Self {
            bearer: Some(bearer),
            ..Self::anonymous(name, document, variables)
        }
    }

    /// Copy of this request with a different credential, used for the replay.
    ///
    /// The copy gets a fresh request id so the two attempts can be told apart
    /// in server logs.
    pub fn with_bearer(&self, bearer: String) -> Self {
        Self {
            bearer: Some(bearer),
            request_id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.bearer.is_some()
    }
}

impl std::fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingRequest")
            .field("name", &self.name)
            .field("variables", &self.variables)
            .field("bearer", &self.bearer.as_ref().map(|_| "[REDACTED]"))
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// [`Transport`] that POSTs the request envelope to a single endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: HttpClient,
    endpoint: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: HttpClient, endpoint: Url) -> Self {
        Self {
            client,
            endpoint,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Bound on a single attempt, covering connect, send and body read.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(&self, request: &OutgoingRequest) -> Result<Value, Failure> {
        let body = RequestEnvelope {
            operation_name: &request.name,
            query: request.document.as_deref(),
            variables: &request.variables,
        };

        let mut builder = self
            .client
            .inner()
            .post(self.endpoint.clone())
            .header(REQUEST_ID_HEADER, request.request_id.to_string())
            .json(&body);
        if let Some(bearer) = &request.bearer {
            builder = builder.header(AUTHORIZATION, bearer);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let text = response.text().await.map_err(classify)?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(Failure::rejected());
        }

        // GraphQL servers often answer errors with a 4xx and an envelope; the
        // envelope is the more precise signal when it parses.
        let envelope = serde_json::from_str::<ResponseEnvelope>(&text);

        if status.is_server_error() {
            return Err(Failure::Network(NetworkFailure::Other(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&text, 200)
            ))));
        }

        match envelope {
            Ok(env) if !status.is_success() && env.errors.is_empty() => {
                Err(http_application(status, &text))
            }
            Ok(env) => env.into_result(),
            Err(_) if !status.is_success() => Err(http_application(status, &text)),
            Err(e) => Err(Failure::Decode(format!("invalid response envelope: {e}"))),
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &OutgoingRequest) -> Result<Value, Failure> {
        debug!(
            operation = %request.name,
            request_id = %request.request_id,
            authenticated = request.is_authenticated(),
            "Sending operation"
        );

        match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    debug!(operation = %request.name, kind = e.kind(), "Operation failed");
                }
                result
            }
            Err(_) => {
                warn!(
                    operation = %request.name,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Operation timed out"
                );
                Err(Failure::timeout())
            }
        }
    }
}

fn http_application(status: StatusCode, body: &str) -> Failure {
    Failure::Application {
        code: format!("HTTP_{}", status.as_u16()),
        message: truncate(body, 200).to_string(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Map a reqwest error onto the network failure classes.
pub(crate) fn classify(err: reqwest::Error) -> Failure {
    if err.is_timeout() {
        return Failure::timeout();
    }
    let message = error_chain(&err);
    if err.is_connect() {
        return Failure::Network(NetworkFailure::Connectivity(message));
    }
    classify_message(message)
}

/// Classify an error description that carries no structured kind.
pub fn classify_message(message: impl Into<String>) -> Failure {
    let message = message.into();
    let lower = message.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        Failure::timeout()
    } else if CONNECTIVITY_MARKERS.iter().any(|m| lower.contains(m)) {
        Failure::Network(NetworkFailure::Connectivity(message))
    } else {
        Failure::Network(NetworkFailure::Other(message))
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
