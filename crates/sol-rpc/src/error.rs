use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// JSON-RPC server error: transaction failed preflight simulation.
pub const PREFLIGHT_FAILURE_CODE: i64 = -32002;
/// JSON-RPC server error: node is behind the cluster.
pub const NODE_UNHEALTHY_CODE: i64 = -32005;

/// Closed set of failure categories reported by an RPC client.
///
/// The submission engine decides whether to retry from the kind alone; it
/// never inspects the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorKind {
    Timeout,
    BlockhashNotFound,
    BlockHeightExceeded,
    RateLimited,
    NetworkCongestion,
    /// Connection refused, DNS failure, non-success HTTP status.
    Transport,
    /// Preflight simulation rejected the transaction.
    PreflightFailure,
    /// The endpoint answered with something we could not decode.
    InvalidResponse,
    /// Any other JSON-RPC error object.
    Rpc,
}

impl RpcErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            RpcErrorKind::Timeout
                | RpcErrorKind::BlockhashNotFound
                | RpcErrorKind::BlockHeightExceeded
                | RpcErrorKind::RateLimited
                | RpcErrorKind::NetworkCongestion
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RpcErrorKind::Timeout => "timeout",
            RpcErrorKind::BlockhashNotFound => "blockhash_not_found",
            RpcErrorKind::BlockHeightExceeded => "block_height_exceeded",
            RpcErrorKind::RateLimited => "rate_limited",
            RpcErrorKind::NetworkCongestion => "network_congestion",
            RpcErrorKind::Transport => "transport",
            RpcErrorKind::PreflightFailure => "preflight_failure",
            RpcErrorKind::InvalidResponse => "invalid_response",
            RpcErrorKind::Rpc => "rpc",
        }
    }

    /// Classify a JSON-RPC error object.
    ///
    /// Message markers win over the numeric code: a preflight failure whose
    /// message says the blockhash was not found is still retryable.
    pub fn classify(code: Option<i64>, message: &str) -> Self {
        let msg = message.to_lowercase();

        if msg.contains("blockhash not found") {
            RpcErrorKind::BlockhashNotFound
        } else if msg.contains("block height exceeded") || msg.contains("has expired") {
            RpcErrorKind::BlockHeightExceeded
        } else if msg.contains("timed out") || msg.contains("timeout") {
            RpcErrorKind::Timeout
        } else if msg.contains("rate limit") || msg.contains("too many requests") {
            RpcErrorKind::RateLimited
        } else if msg.contains("congest")
            || msg.contains("node is behind")
            || msg.contains("node is unhealthy")
            || code == Some(NODE_UNHEALTHY_CODE)
        {
            RpcErrorKind::NetworkCongestion
        } else if code == Some(PREFLIGHT_FAILURE_CODE) {
            RpcErrorKind::PreflightFailure
        } else {
            RpcErrorKind::Rpc
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => RpcErrorKind::RateLimited,
            408 | 504 => RpcErrorKind::Timeout,
            503 => RpcErrorKind::NetworkCongestion,
            _ => RpcErrorKind::Transport,
        }
    }
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An RPC failure with the endpoint that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} error from {endpoint}: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
    /// JSON-RPC error code, when the server sent one.
    pub code: Option<i64>,
    pub endpoint: String,
    /// The JSON-RPC `error.data` payload (the simulation result for
    /// preflight failures).
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(
        kind: RpcErrorKind,
        endpoint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            endpoint: endpoint.into(),
            data: None,
        }
    }

    /// Build from a JSON-RPC error object, classifying it.
    pub fn from_response(
        endpoint: impl Into<String>,
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        let message = message.into();
        Self {
            kind: RpcErrorKind::classify(Some(code), &message),
            message,
            code: Some(code),
            endpoint: endpoint.into(),
            data,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Whether the endpoint could not be reached or did not answer usefully.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self.kind,
            RpcErrorKind::Transport | RpcErrorKind::Timeout | RpcErrorKind::InvalidResponse
        )
    }
}
