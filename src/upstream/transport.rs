//! HTTP transport for the JSON-RPC endpoint, the enhanced-transactions REST
//! API and the quote endpoint.
//!
//! A transport performs exactly one request per call. Retries, batching and
//! pacing belong to the governor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::governor::UpstreamError;

/// Query string pairs, owned so governed calls can replay them on retry
pub type Query = Vec<(String, String)>;

/// One outbound request against the upstream services
#[async_trait]
pub trait Transport: Send + Sync {
    /// JSON-RPC call returning the `result` member
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, UpstreamError>;

    /// `GET {api_base}{path}`
    async fn rest_get(&self, path: &str, query: Query) -> Result<Value, UpstreamError>;

    /// `POST {api_base}{path}` with a JSON body
    async fn rest_post(&self, path: &str, body: Value) -> Result<Value, UpstreamError>;

    /// `GET` an absolute URL (quote endpoint)
    async fn fetch_url(&self, url: &str, query: Query) -> Result<Value, UpstreamError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    http: Client,
    rpc_url: String,
    api_base_url: String,
    api_key: Option<String>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("rpc_url", &self.rpc_url)
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Create a new HTTP transport with timeout configuration
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Transport {
                endpoint: config.rpc_url.clone(),
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            rpc_url: config.rpc_url.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    fn with_api_key(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.query(&[("api-key", key.as_str())]),
            None => request,
        }
    }

    /// Send and decode; non-2xx statuses become classified errors
    async fn send_json(&self, endpoint: &str, request: RequestBuilder) -> Result<Value, UpstreamError> {
        let response = request.send().await.map_err(|e| UpstreamError::Transport {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(endpoint, status.as_u16(), body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::malformed(endpoint, format!("invalid JSON body: {}", e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "RPC request");

        let body = self
            .send_json(method, self.http.post(&self.rpc_url).json(&payload))
            .await?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error");
            return Err(UpstreamError::from_rpc_error(method, code, message));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| UpstreamError::malformed(method, "response has neither result nor error"))
    }

    async fn rest_get(&self, path: &str, query: Query) -> Result<Value, UpstreamError> {
        let url = format!("{}{}", self.api_base_url, path);
        debug!(%url, "REST GET");
        let request = self.with_api_key(self.http.get(&url).query(&query));
        self.send_json(path, request).await
    }

    async fn rest_post(&self, path: &str, body: Value) -> Result<Value, UpstreamError> {
        let url = format!("{}{}", self.api_base_url, path);
        debug!(%url, "REST POST");
        let request = self.with_api_key(self.http.post(&url).json(&body));
        self.send_json(path, request).await
    }

    async fn fetch_url(&self, url: &str, query: Query) -> Result<Value, UpstreamError> {
        debug!(%url, "GET");
        self.send_json(url, self.http.get(url).query(&query)).await
    }
}
