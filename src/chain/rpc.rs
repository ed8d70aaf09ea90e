//! JSON-RPC transport to Hive API nodes
//!
//! `ChainRpc` is the seam the gateway talks through. `HiveRpcClient` is the
//! production implementation: JSON-RPC 2.0 over HTTPS with a bounded
//! per-call timeout. When a node cannot be reached at all the next
//! configured node is tried; any other failure is returned as is, so a
//! broadcast is never delivered twice.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Transport-level failure of a chain call
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("No RPC nodes configured")]
    NoNodes,
}

/// A JSON-RPC capable chain endpoint
#[async_trait::async_trait]
pub trait ChainRpc: Send + Sync {
    /// Invoke `method` (e.g. `bridge.get_community`) with `params`
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// reqwest-backed client for one or more Hive API nodes
pub struct HiveRpcClient {
    nodes: Vec<String>,
    http_client: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
    /// Index of the node that last answered
    preferred: AtomicUsize,
}

impl HiveRpcClient {
    pub fn new(nodes: Vec<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hubkeeper/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            nodes,
            http_client,
            timeout,
            next_id: AtomicU64::new(1),
            preferred: AtomicUsize::new(0),
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    async fn call_node(&self, node: &str, body: &Value) -> Result<Value, RpcError> {
        let response = self
            .http_client
            .post(node)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !response.status().is_success() {
            return Err(RpcError::Transport(format!(
                "{} answered HTTP {}",
                node,
                response.status()
            )));
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

        if let Some(err) = envelope.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }

    fn classify(&self, err: reqwest::Error) -> RpcError {
        if err.is_timeout() {
            RpcError::Timeout(self.timeout.as_millis() as u64)
        } else if err.is_connect() {
            RpcError::Unreachable(err.to_string())
        } else {
            RpcError::Transport(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl ChainRpc for HiveRpcClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if self.nodes.is_empty() {
            return Err(RpcError::NoNodes);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let start = self.preferred.load(Ordering::Relaxed) % self.nodes.len();
        let mut last_error = RpcError::NoNodes;

        for offset in 0..self.nodes.len() {
            let index = (start + offset) % self.nodes.len();
            let node = &self.nodes[index];
            debug!(method = %method, node = %node, id, "RPC call");

            match self.call_node(node, &body).await {
                Ok(result) => {
                    self.preferred.store(index, Ordering::Relaxed);
                    return Ok(result);
                }
                // Only connection failures move on; the request never left.
                Err(RpcError::Unreachable(message)) => {
                    warn!(
                        method = %method,
                        node = %node,
                        error = %message,
                        "RPC node unreachable, trying next"
                    );
                    last_error = RpcError::Unreachable(message);
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_error)
    }
}
