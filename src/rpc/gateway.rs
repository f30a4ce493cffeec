//! The failover JSON-RPC gateway.
//!
//! Request strategy: walk the endpoint list in priority order, skipping any
//! endpoint whose circuit is open. A transport failure or retryable provider
//! error counts against the endpoint and retries on it with exponential
//! backoff (500 ms base, 8 s cap, 3 attempts) before moving to the next one.
//! The full list is walked twice before giving up with `RpcError::Unavailable`.
//!
//! Definite answers pass straight through: a revert or a range-limit
//! rejection is the node doing its job, not an endpoint failure.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RpcConfig;
use crate::error::RpcError;
use crate::retry::RetryPolicy;

use super::health::{Availability, EndpointHealth, HealthClock};
use super::transport::{
    parse_hex_u64, JsonRpcRequest, JsonRpcResponse, LogFilter, RpcLog, RpcReceipt,
};

/// Full passes over the endpoint list before declaring the chain unreachable.
const ROTATIONS: usize = 2;

struct Endpoint {
    url: String,
    health: EndpointHealth,
}

pub struct RpcGateway {
    endpoints: Vec<Endpoint>,
    http: reqwest::Client,
    clock: HealthClock,
    policy: RetryPolicy,
    next_id: AtomicU64,
    /// Index of the endpoint that last served a request, so healthy traffic
    /// sticks to one provider instead of ping-ponging.
    preferred: AtomicUsize,
}

impl RpcGateway {
    pub fn new(cfg: &RpcConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!cfg.endpoints.is_empty(), "no RPC endpoints configured");
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            endpoints: cfg
                .endpoints
                .iter()
                .map(|url| Endpoint { url: url.clone(), health: EndpointHealth::new() })
                .collect(),
            http,
            clock: HealthClock::new(),
            policy: RetryPolicy::rpc(),
            next_id: AtomicU64::new(1),
            preferred: AtomicUsize::new(0),
        })
    }

    // === Chain interface ===

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let v = self.request("eth_blockNumber", serde_json::json!([])).await?;
        as_hex_u64(&v)
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>, RpcError> {
        let v = self.request("eth_getLogs", filter.to_params()).await?;
        serde_json::from_value(v).map_err(|e| RpcError::Malformed(format!("eth_getLogs: {e}")))
    }

    /// `eth_call` against latest state.
    pub async fn call(&self, to: Address, data: &Bytes) -> Result<Bytes, RpcError> {
        let params = serde_json::json!([
            { "to": format!("{to:#x}"), "data": format!("{data}") },
            "latest"
        ]);
        let v = self.request("eth_call", params).await?;
        as_bytes(&v)
    }

    pub async fn gas_price(&self) -> Result<U256, RpcError> {
        let v = self.request("eth_gasPrice", serde_json::json!([])).await?;
        as_hex_u256(&v)
    }

    pub async fn estimate_gas(&self, from: Address, to: Address, data: &Bytes) -> Result<u64, RpcError> {
        let params = serde_json::json!([{
            "from": format!("{from:#x}"),
            "to": format!("{to:#x}"),
            "data": format!("{data}"),
        }]);
        let v = self.request("eth_estimateGas", params).await?;
        as_hex_u64(&v)
    }

    pub async fn transaction_count(&self, addr: Address) -> Result<u64, RpcError> {
        let params = serde_json::json!([format!("{addr:#x}"), "pending"]);
        let v = self.request("eth_getTransactionCount", params).await?;
        as_hex_u64(&v)
    }

    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, RpcError> {
        let params = serde_json::json!([format!("0x{}", alloy::hex::encode(raw))]);
        let v = self.request("eth_sendRawTransaction", params).await?;
        let s = v
            .as_str()
            .ok_or_else(|| RpcError::Malformed("tx hash is not a string".into()))?;
        s.parse::<B256>()
            .map_err(|e| RpcError::Malformed(format!("bad tx hash {s:?}: {e}")))
    }

    /// `None` while the transaction is still pending.
    pub async fn transaction_receipt(&self, hash: B256) -> Result<Option<RpcReceipt>, RpcError> {
        let params = serde_json::json!([format!("{hash:#x}")]);
        let v = self.request("eth_getTransactionReceipt", params).await?;
        if v.is_null() {
            return Ok(None);
        }
        serde_json::from_value(v)
            .map(Some)
            .map_err(|e| RpcError::Malformed(format!("receipt: {e}")))
    }

    /// Lifetime (success, failure) counters per endpoint, for the health probe.
    pub fn endpoint_stats(&self) -> Vec<(String, u64, u64, bool)> {
        self.endpoints
            .iter()
            .map(|e| {
                let (ok, fail) = e.health.stats();
                (e.url.clone(), ok, fail, e.health.is_open())
            })
            .collect()
    }

    // === Core request loop ===

    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let n = self.endpoints.len();
        let start = self.preferred.load(Ordering::Relaxed) % n;
        let mut last_err = RpcError::Unavailable;

        for pass in 0..ROTATIONS {
            for offset in 0..n {
                let idx = (start + offset) % n;
                let endpoint = &self.endpoints[idx];

                match endpoint.health.availability(self.clock.now_ms()) {
                    Availability::Open => continue,
                    Availability::Probe => {
                        debug!("[RPC] half-open probe on {}", endpoint.url);
                    }
                    Availability::Healthy => {}
                }

                match self.try_endpoint(endpoint, method, &params).await {
                    Ok(v) => {
                        self.preferred.store(idx, Ordering::Relaxed);
                        return Ok(v);
                    }
                    // Definite answers stop the rotation entirely.
                    Err(e @ RpcError::BlockRangeTooLarge) => return Err(e),
                    Err(e @ RpcError::Call { .. }) if !e.is_retryable() => return Err(e),
                    Err(e) => {
                        warn!(
                            "[RPC] {} failed on {} (pass {}): {}",
                            method, endpoint.url, pass + 1, e
                        );
                        last_err = e;
                    }
                }
            }
        }

        if matches!(last_err, RpcError::Unavailable) {
            warn!("[RPC] all endpoints circuit-open for {}", method);
        }
        Err(match last_err {
            RpcError::Transport(_) | RpcError::Call { .. } => RpcError::Unavailable,
            other => other,
        })
    }

    /// Up to `policy.max_attempts` tries against a single endpoint.
    async fn try_endpoint(
        &self,
        endpoint: &Endpoint,
        method: &str,
        params: &Value,
    ) -> Result<Value, RpcError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(&endpoint.url, method, params.clone()).await {
                Ok(v) => {
                    endpoint.health.record_success();
                    return Ok(v);
                }
                Err(e @ RpcError::BlockRangeTooLarge) => {
                    // The endpoint answered; the window was simply too wide.
                    endpoint.health.record_success();
                    return Err(e);
                }
                Err(e @ RpcError::Call { .. }) if !e.is_retryable() => {
                    endpoint.health.record_success();
                    return Err(e);
                }
                Err(e) => {
                    endpoint.health.record_failure(self.clock.now_ms());
                    if !self.policy.should_retry(attempt) || endpoint.health.is_open() {
                        return Err(e);
                    }
                    let delay = self.policy.delay(attempt);
                    debug!("[RPC] retrying {} on {} in {:?}", method, endpoint.url, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn send_once(&self, url: &str, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let response = self
            .http
            .post(url)
            .json(&req)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            // Back off rather than hammering a throttled provider.
            tokio::time::sleep(Duration::from_millis(250)).await;
            return Err(RpcError::Transport("HTTP 429".into()));
        }
        if status.is_server_error() {
            return Err(RpcError::Transport(format!("HTTP {status}")));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(format!("body read: {e}")))?;

        if let Some(err) = body.error {
            return Err(err.classify());
        }
        body.result
            .ok_or_else(|| RpcError::Malformed("response had neither result nor error".into()))
    }
}

fn as_hex_u64(v: &Value) -> Result<u64, RpcError> {
    let s = v
        .as_str()
        .ok_or_else(|| RpcError::Malformed("expected hex quantity string".into()))?;
    parse_hex_u64(s).map_err(RpcError::Malformed)
}

fn as_hex_u256(v: &Value) -> Result<U256, RpcError> {
    let s = v
        .as_str()
        .ok_or_else(|| RpcError::Malformed("expected hex quantity string".into()))?;
    U256::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::Malformed(format!("bad quantity {s:?}: {e}")))
}

fn as_bytes(v: &Value) -> Result<Bytes, RpcError> {
    let s = v
        .as_str()
        .ok_or_else(|| RpcError::Malformed("expected hex data string".into()))?;
    s.parse::<Bytes>()
        .map_err(|e| RpcError::Malformed(format!("bad data {s:?}: {e}")))
}
