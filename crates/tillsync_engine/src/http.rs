//! The REST client collaborator seam.
//!
//! The engine never talks HTTP directly; it describes requests and
//! hands them to a [`RestClient`]. This keeps the engine independent of
//! the HTTP library and lets tests drive full cycles against a mock.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// Options attached to a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// URL query parameters.
    pub params: Vec<(String, String)>,
    /// Extra headers, e.g. the method-override header.
    pub headers: Vec<(String, String)>,
    /// Opaque fetch priority hint, passed through to the transport.
    /// Transports without a priority knob ignore it.
    pub priority: Option<String>,
}

impl RequestOptions {
    /// Options carrying only query parameters.
    pub fn with_params(params: Vec<(String, String)>) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the priority hint.
    pub fn priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }
}

/// A REST response: the parsed JSON body plus response headers.
#[derive(Debug, Clone, Default)]
pub struct RestResponse {
    /// Parsed JSON body.
    pub data: Value,
    /// Response headers (name, value), lowercase names.
    pub headers: Vec<(String, String)>,
}

impl RestResponse {
    /// A response with a body and no headers.
    pub fn body(data: Value) -> Self {
        Self {
            data,
            headers: Vec::new(),
        }
    }

    /// Looks up a header value by (lowercase) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// The HTTP collaborator.
///
/// Implementations are responsible for timeouts, TLS and auth; the
/// engine treats any failure as a [`EngineError::Network`] caught at
/// the cycle boundary.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Performs a GET request.
    async fn get(&self, path: &str, options: &RequestOptions) -> EngineResult<RestResponse>;

    /// Performs a POST request. Combined with the method-override
    /// header this carries large include lists as a body while
    /// semantically performing a GET.
    async fn post(
        &self,
        path: &str,
        body: Value,
        options: &RequestOptions,
    ) -> EngineResult<RestResponse>;
}

/// A recorded call against the mock client.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// `GET` or `POST`.
    pub method: &'static str,
    /// Request path.
    pub path: String,
    /// Query parameters.
    pub params: Vec<(String, String)>,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// POST body, if any.
    pub body: Option<Value>,
}

/// A mock REST client with queued responses and a call log.
#[derive(Debug, Default)]
pub struct MockRestClient {
    responses: Mutex<VecDeque<EngineResult<RestResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Mutex<Option<Duration>>,
}

impl MockRestClient {
    /// Creates a mock with no queued responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next response.
    pub fn push_response(&self, response: EngineResult<RestResponse>) {
        self.responses.lock().push_back(response);
    }

    /// Queues a successful JSON body.
    pub fn push_body(&self, data: Value) {
        self.push_response(Ok(RestResponse::body(data)));
    }

    /// Delays every response, keeping requests in flight long enough
    /// for concurrency tests.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    async fn respond(&self, call: RecordedCall) -> EngineResult<RestResponse> {
        self.calls.lock().push(call);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::network_fatal("no mock response queued")))
    }
}

#[async_trait]
impl RestClient for MockRestClient {
    async fn get(&self, path: &str, options: &RequestOptions) -> EngineResult<RestResponse> {
        self.respond(RecordedCall {
            method: "GET",
            path: path.to_string(),
            params: options.params.clone(),
            headers: options.headers.clone(),
            body: None,
        })
        .await
    }

    async fn post(
        &self,
        path: &str,
        body: Value,
        options: &RequestOptions,
    ) -> EngineResult<RestResponse> {
        self.respond(RecordedCall {
            method: "POST",
            path: path.to_string(),
            params: options.params.clone(),
            headers: options.headers.clone(),
            body: Some(body),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn queued_responses_in_order() {
        let client = MockRestClient::new();
        client.push_body(json!([1]));
        client.push_body(json!([2]));

        let first = client.get("products", &RequestOptions::default()).await.unwrap();
        let second = client.get("products", &RequestOptions::default()).await.unwrap();
        assert_eq!(first.data, json!([1]));
        assert_eq!(second.data, json!([2]));
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_queue_is_a_network_error() {
        let client = MockRestClient::new();
        let err = client
            .get("products", &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Network { .. }));
    }

    #[test]
    fn response_header_lookup() {
        let response = RestResponse {
            data: json!(null),
            headers: vec![("x-wp-total".into(), "12".into())],
        };
        assert_eq!(response.header("x-wp-total"), Some("12"));
        assert_eq!(response.header("missing"), None);
    }
}
