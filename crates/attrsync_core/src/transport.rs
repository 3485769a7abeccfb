//! Transport layer abstraction for network delivery.

use crate::error::{SyncError, SyncResult};
use attrsync_document::Document;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// HTTP-style request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read a resource.
    Get,
    /// Create a resource.
    Post,
    /// Apply a partial update.
    Patch,
    /// Replace a resource.
    Put,
    /// Remove a resource.
    Delete,
}

/// A serializable request descriptor.
///
/// Requests are opaque to the delivery machinery: the vault persists them
/// verbatim and replays them through a [`Transport`]. The idempotency key is
/// generated once and survives retries and process restarts, so the server
/// can deduplicate repeated deliveries of the same request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Resource path, e.g. `/installation`.
    pub resource: String,
    /// Request body document.
    pub body: Document,
    /// Idempotency key, generated once per logical request.
    pub idempotency_key: String,
}

impl Request {
    /// Creates a request with a fresh idempotency key.
    #[must_use]
    pub fn new(method: Method, resource: impl Into<String>, body: Document) -> Self {
        Self {
            method,
            resource: resource.into(),
            body,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// A response from the remote attribute store.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP-style status code.
    pub status: u16,
    /// Response body document.
    pub body: serde_json::Value,
}

impl Response {
    /// Creates a 200 response with the given body.
    #[must_use]
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    /// Returns true if the status code indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes requests against the remote attribute store.
///
/// This trait abstracts the network layer, allowing different
/// implementations (an HTTP client, a loopback server, a mock for testing).
/// Implementations must distinguish transient failures (connectivity,
/// timeouts) from permanent ones via [`SyncError::is_retryable`]; the
/// delivery vault's retry policy depends on it.
pub trait Transport: Send + Sync {
    /// Executes one delivery attempt of `request`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] with `retryable = true` for
    /// network-class failures and `retryable = false` (or
    /// [`SyncError::Rejected`]) for permanent ones.
    fn execute(&self, request: &Request) -> SyncResult<Response>;
}

/// A mock transport for testing.
///
/// Outcomes are scripted in order; once the script is exhausted every
/// request succeeds with an empty body. All executed requests are recorded.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<SyncResult<Response>>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    /// Creates a mock transport that succeeds by default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next outcome as the given response.
    pub fn push_response(&self, response: Response) {
        self.script.lock().push_back(Ok(response));
    }

    /// Scripts the next outcome as a transient network failure.
    pub fn push_transient_failure(&self) {
        self.script
            .lock()
            .push_back(Err(SyncError::transport_retryable("mock network failure")));
    }

    /// Scripts the next outcome as a permanent failure.
    pub fn push_permanent_failure(&self) {
        self.script
            .lock()
            .push_back(Err(SyncError::Rejected { status: 400 }));
    }

    /// Returns all requests executed so far.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Returns how many requests were executed.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &Request) -> SyncResult<Response> {
        self.requests.lock().push(request.clone());
        match self.script.lock().pop_front() {
            Some(outcome) => outcome,
            None => Ok(Response::ok(serde_json::json!({}))),
        }
    }
}
