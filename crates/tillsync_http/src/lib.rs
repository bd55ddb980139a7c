//! # TillSync HTTP
//!
//! Reqwest-backed [`RestClient`] implementation for the tillsync
//! engine.
//!
//! Transport concerns live entirely here: base-URL joining, TLS, basic
//! auth, timeouts and the mapping of HTTP outcomes onto the engine's
//! error model. Timeouts, connection failures and 5xx/429 responses map
//! to retryable network errors; other non-success statuses are fatal
//! for the current cycle.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tillsync_engine::{EngineError, EngineResult, RequestOptions, RestClient, RestResponse};

/// Connection settings for a remote REST API.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL of the API, e.g. `https://shop.example/wp-json/wc/v3`.
    pub base_url: String,
    /// Optional basic-auth credentials (key, secret).
    pub auth: Option<(String, String)>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpConfig {
    /// Creates a config for a base URL with a 30 second timeout and no
    /// auth.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets basic-auth credentials.
    pub fn with_auth(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.auth = Some((key.into(), secret.into()));
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A [`RestClient`] backed by a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    config: HttpConfig,
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Builds the client. Fails if the TLS backend cannot initialize.
    pub fn new(config: HttpConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| EngineError::network_fatal(err.to_string()))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn prepare(
        &self,
        mut request: reqwest::RequestBuilder,
        options: &RequestOptions,
    ) -> reqwest::RequestBuilder {
        if !options.params.is_empty() {
            request = request.query(&options.params);
        }
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        if let Some((key, secret)) = &self.config.auth {
            request = request.basic_auth(key, Some(secret));
        }
        request
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> EngineResult<RestResponse> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        if !status.is_success() {
            let message = format!(
                "{} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("error")
            );
            tracing::debug!(status = status.as_u16(), "request failed");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                EngineError::network_retryable(message)
            } else {
                EngineError::network_fatal(message)
            });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| EngineError::Validation(format!("invalid JSON response: {err}")))?;
        Ok(RestResponse { data, headers })
    }
}

fn map_transport_error(err: reqwest::Error) -> EngineError {
    if err.is_timeout() || err.is_connect() {
        EngineError::network_retryable(err.to_string())
    } else {
        EngineError::network_fatal(err.to_string())
    }
}

#[async_trait]
impl RestClient for ReqwestClient {
    async fn get(&self, path: &str, options: &RequestOptions) -> EngineResult<RestResponse> {
        let request = self.prepare(self.client.get(self.url(path)), options);
        self.execute(request).await
    }

    async fn post(
        &self,
        path: &str,
        body: Value,
        options: &RequestOptions,
    ) -> EngineResult<RestResponse> {
        let request = self.prepare(self.client.post(self.url(path)).json(&body), options);
        self.execute(request).await
    }
}
