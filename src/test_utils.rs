//! Test Utilities Module
//!
//! Scripted in-memory [`Transport`] for driving the upstream client and the
//! dashboard store without a network.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::Config;
use crate::governor::{GovernorConfig, RequestGovernor, RetryPolicy, UpstreamError};
use crate::upstream::transport::{Query, Transport};
use crate::upstream::UpstreamClient;

type Handler = Arc<dyn Fn(&Value) -> Result<Value, UpstreamError> + Send + Sync>;

/// One request observed by the fake
#[derive(Debug, Clone, PartialEq)]
pub struct FakeCall {
    /// `rpc:{method}`, `GET {path}`, `POST {path}` or `GET {url}`
    pub key: String,
    /// RPC params, POST body, or the query pairs as an object
    pub payload: Value,
}

#[derive(Default)]
struct Script {
    once: HashMap<String, VecDeque<Result<Value, UpstreamError>>>,
    handlers: HashMap<String, Handler>,
    calls: Vec<FakeCall>,
}

/// Transport answering from scripted responses.
///
/// One-shot responses queued with [`push`](Self::push) are consumed first;
/// afterwards the handler registered with [`handle`](Self::handle) answers.
/// Requests with neither get an HTTP 404.
#[derive(Clone, Default)]
pub struct FakeTransport {
    script: Arc<Mutex<Script>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rpc_key(method: &str) -> String {
        format!("rpc:{}", method)
    }

    pub fn get_key(path: &str) -> String {
        format!("GET {}", path)
    }

    pub fn post_key(path: &str) -> String {
        format!("POST {}", path)
    }

    /// Queue a single response for `key`
    pub fn push(&self, key: impl Into<String>, response: Result<Value, UpstreamError>) -> &Self {
        self.script
            .lock()
            .once
            .entry(key.into())
            .or_default()
            .push_back(response);
        self
    }

    /// Answer every request for `key` with `handler(payload)`
    pub fn handle<F>(&self, key: impl Into<String>, handler: F) -> &Self
    where
        F: Fn(&Value) -> Result<Value, UpstreamError> + Send + Sync + 'static,
    {
        self.script.lock().handlers.insert(key.into(), Arc::new(handler));
        self
    }

    /// Answer every request for `key` with the same value
    pub fn always(&self, key: impl Into<String>, response: Result<Value, UpstreamError>) -> &Self {
        self.handle(key, move |_| response.clone())
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.script.lock().calls.clone()
    }

    pub fn call_count(&self, key: &str) -> usize {
        self.script.lock().calls.iter().filter(|c| c.key == key).count()
    }

    fn respond(&self, key: String, payload: Value) -> Result<Value, UpstreamError> {
        let handler = {
            let mut script = self.script.lock();
            script.calls.push(FakeCall {
                key: key.clone(),
                payload: payload.clone(),
            });
            if let Some(response) = script.once.get_mut(&key).and_then(VecDeque::pop_front) {
                return response;
            }
            script.handlers.get(&key).cloned()
        };

        match handler {
            Some(handler) => handler(&payload),
            None => Err(UpstreamError::Http {
                endpoint: key,
                status: 404,
                body: "no scripted response".to_string(),
            }),
        }
    }
}

fn query_object(query: &Query) -> Value {
    Value::Object(
        query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

#[async_trait]
impl Transport for FakeTransport {
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        self.respond(Self::rpc_key(method), params)
    }

    async fn rest_get(&self, path: &str, query: Query) -> Result<Value, UpstreamError> {
        self.respond(Self::get_key(path), query_object(&query))
    }

    async fn rest_post(&self, path: &str, body: Value) -> Result<Value, UpstreamError> {
        self.respond(Self::post_key(path), body)
    }

    async fn fetch_url(&self, url: &str, query: Query) -> Result<Value, UpstreamError> {
        self.respond(Self::get_key(url), query_object(&query))
    }
}

/// Upstream client over `transport` with the default batching and a short
/// retry delay, for use under a paused clock.
pub fn fake_client(transport: FakeTransport, config: Config) -> UpstreamClient {
    let governor = RequestGovernor::new(
        GovernorConfig::default(),
        RetryPolicy::new(config.governor.max_retries, std::time::Duration::from_millis(100)),
    );
    UpstreamClient::new(Arc::new(transport), governor, config)
}

/// Enhanced transaction JSON moving `amount` of `mint` from `from` to `to`
pub fn enhanced_transfer(signature: &str, timestamp: i64, from: &str, to: &str, mint: &str, amount: f64) -> Value {
    json!({
        "signature": signature,
        "timestamp": timestamp,
        "fee": 5000,
        "feePayer": from,
        "type": "TRANSFER",
        "source": "SYSTEM_PROGRAM",
        "description": format!("{} transferred {} tokens to {}", from, amount, to),
        "tokenTransfers": [{
            "fromUserAccount": from,
            "toUserAccount": to,
            "mint": mint,
            "tokenAmount": amount
        }],
        "nativeTransfers": []
    })
}

/// `getTokenSupply` result for `ui_amount` whole tokens
pub fn supply_result(ui_amount: f64, decimals: u8) -> Value {
    let raw = (ui_amount * 10f64.powi(decimals as i32)) as u64;
    json!({
        "context": {"slot": 1},
        "value": {
            "amount": raw.to_string(),
            "decimals": decimals,
            "uiAmount": ui_amount,
            "uiAmountString": ui_amount.to_string()
        }
    })
}
