//! JSON-RPC 2.0 over HTTP(S).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sol_tx::{Hash, Signature, Transaction};
use tracing::{debug, trace};

use crate::client::RpcClient;
use crate::error::{RpcError, RpcErrorKind};
use crate::types::{
    Commitment, ConfirmedTransaction, LatestBlockhash, SendConfig, SignatureStatus,
    SimulateConfig, SimulationResult, TransactionMeta,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// RPC client backed by a shared `reqwest` connection pool.
pub struct HttpRpcClient {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::with_options(url, DEFAULT_REQUEST_TIMEOUT, &BTreeMap::new())
    }

    /// Build a client with a per-request timeout and extra HTTP headers
    /// (provider API keys and the like).
    pub fn with_options(
        url: impl Into<String>,
        timeout: Duration,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, RpcError> {
        let url = url.into();

        let mut header_map = HeaderMap::new();
        header_map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                RpcError::new(
                    RpcErrorKind::Transport,
                    &url,
                    format!("invalid header name {name}: {e}"),
                )
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                RpcError::new(
                    RpcErrorKind::Transport,
                    &url,
                    format!("invalid value for header {name}: {e}"),
                )
            })?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(header_map)
            .build()
            .map_err(|e| {
                RpcError::new(RpcErrorKind::Transport, &url, format!("build http client: {e}"))
            })?;

        Ok(Self {
            client,
            url,
            request_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = request_body(id, method, params);
        trace!(endpoint = %self.url, method, id, "rpc request");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(method, e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(endpoint = %self.url, method, status = status.as_u16(), "rpc http failure");
            return Err(RpcError::new(
                RpcErrorKind::from_http_status(status.as_u16()),
                &self.url,
                format!("{method}: http status {status}"),
            ));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| self.transport_error(method, e))?;

        parse_response(&self.url, method, json)
    }

    fn transport_error(&self, method: &str, err: reqwest::Error) -> RpcError {
        let kind = if err.is_timeout() {
            RpcErrorKind::Timeout
        } else if err.is_decode() {
            RpcErrorKind::InvalidResponse
        } else {
            RpcErrorKind::Transport
        };
        RpcError::new(kind, &self.url, format!("{method}: {err}"))
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn send_transaction(
        &self,
        wire: &[u8],
        config: &SendConfig,
    ) -> Result<Signature, RpcError> {
        let mut options = json!({
            "encoding": "base64",
            "skipPreflight": config.skip_preflight,
        });
        if let Some(commitment) = config.preflight_commitment {
            options["preflightCommitment"] = json!(commitment.as_str());
        }
        self.call("sendTransaction", json!([BASE64.encode(wire), options]))
            .await
    }

    async fn simulate_transaction(
        &self,
        wire: &[u8],
        config: &SimulateConfig,
    ) -> Result<SimulationResult, RpcError> {
        let mut options = json!({
            "encoding": "base64",
            "sigVerify": config.sig_verify,
        });
        if let Some(commitment) = config.commitment {
            options["commitment"] = json!(commitment.as_str());
        }
        let response: WithContext<SimulationResult> = self
            .call("simulateTransaction", json!([BASE64.encode(wire), options]))
            .await?;
        Ok(response.value)
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
        search_history: bool,
    ) -> Result<Vec<Option<SignatureStatus>>, RpcError> {
        let signatures: Vec<String> = signatures.iter().map(ToString::to_string).collect();
        let response: WithContext<Vec<Option<SignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([signatures, {"searchTransactionHistory": search_history}]),
            )
            .await?;
        Ok(response.value)
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> Result<Option<ConfirmedTransaction>, RpcError> {
        // getTransaction does not accept `processed`.
        let commitment = commitment.max(Commitment::Confirmed);
        let raw: Option<RawConfirmedTransaction> = self
            .call(
                "getTransaction",
                json!([
                    signature.to_string(),
                    {
                        "encoding": "base64",
                        "commitment": commitment.as_str(),
                        "maxSupportedTransactionVersion": 0,
                    }
                ]),
            )
            .await?;
        raw.map(|raw| raw.decode(&self.url)).transpose()
    }

    async fn get_latest_blockhash(
        &self,
        commitment: Commitment,
    ) -> Result<LatestBlockhash, RpcError> {
        let response: WithContext<RawBlockhash> = self
            .call("getLatestBlockhash", json!([{"commitment": commitment.as_str()}]))
            .await?;
        Ok(LatestBlockhash {
            blockhash: response.value.blockhash,
            last_valid_block_height: response.value.last_valid_block_height,
        })
    }
}

fn request_body(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Split a JSON-RPC response into its result or a classified error.
fn parse_response<T: DeserializeOwned>(
    endpoint: &str,
    method: &str,
    mut json: Value,
) -> Result<T, RpcError> {
    if json["error"].is_object() {
        let error: RpcErrorObject = serde_json::from_value(json["error"].take()).map_err(|e| {
            RpcError::new(
                RpcErrorKind::InvalidResponse,
                endpoint,
                format!("{method}: malformed error object: {e}"),
            )
        })?;
        debug!(endpoint, method, code = error.code, message = %error.message, "rpc error response");
        return Err(RpcError::from_response(endpoint, error.code, error.message, error.data));
    }

    serde_json::from_value(json["result"].take()).map_err(|e| {
        RpcError::new(
            RpcErrorKind::InvalidResponse,
            endpoint,
            format!("{method}: unexpected result shape: {e}"),
        )
    })
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlockhash {
    blockhash: Hash,
    last_valid_block_height: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfirmedTransaction {
    slot: u64,
    #[serde(default)]
    block_time: Option<i64>,
    /// `[payload, encoding]`
    transaction: (String, String),
    #[serde(default)]
    meta: Option<TransactionMeta>,
}

impl RawConfirmedTransaction {
    fn decode(self, endpoint: &str) -> Result<ConfirmedTransaction, RpcError> {
        let invalid = |msg: String| RpcError::new(RpcErrorKind::InvalidResponse, endpoint, msg);

        let (payload, encoding) = self.transaction;
        if encoding != "base64" {
            return Err(invalid(format!("getTransaction: unexpected encoding {encoding}")));
        }
        let transaction = Transaction::from_base64(&payload)
            .map_err(|e| invalid(format!("getTransaction: {e}")))?;

        Ok(ConfirmedTransaction {
            slot: self.slot,
            block_time: self.block_time,
            transaction,
            meta: self.meta,
        })
    }
}
