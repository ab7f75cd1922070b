use serde_json::{json, Map, Value};
use sol_rpc::{RpcError, RpcErrorKind};
use sol_tx::{Pubkey, TxError};
use thiserror::Error;

/// Sub-classification of [`PipelineError::Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorCode {
    /// Bytes could not be decoded or encoded.
    Format,
    MissingAnchor,
    NotFullySigned,
    /// Retries exhausted on a retryable send failure.
    SubmissionFailed,
    SimulationFailed,
    /// The blockhash or nonce is no longer accepted.
    Expired,
}

impl TransactionErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionErrorCode::Format => "TRANSACTION_FORMAT",
            TransactionErrorCode::MissingAnchor => "MISSING_ANCHOR",
            TransactionErrorCode::NotFullySigned => "NOT_FULLY_SIGNED",
            TransactionErrorCode::SubmissionFailed => "SUBMISSION_FAILED",
            TransactionErrorCode::SimulationFailed => "SIMULATION_FAILED",
            TransactionErrorCode::Expired => "ANCHOR_EXPIRED",
        }
    }
}

/// Every failure the pipeline reports to a caller.
///
/// Messages never contain key material: key parsing errors in `sol-tx`
/// describe the shape of the input, not its contents.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid public key: {0}")]
    PublicKey(String),

    #[error("Transaction error: {message}")]
    Transaction {
        code: TransactionErrorCode,
        message: String,
        details: Option<Value>,
    },

    #[error("Program error at instruction {instruction_index}: {message}")]
    Program {
        program_id: Option<Pubkey>,
        instruction_index: u8,
        custom_code: Option<u32>,
        message: String,
        logs: Vec<String>,
    },

    #[error("Connection error on {cluster} ({endpoint}): {message}")]
    Connection {
        cluster: String,
        endpoint: String,
        message: String,
    },
}

impl PipelineError {
    pub fn transaction(code: TransactionErrorCode, message: impl Into<String>) -> Self {
        PipelineError::Transaction {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION_ERROR",
            PipelineError::PublicKey(_) => "PUBLIC_KEY_ERROR",
            PipelineError::Transaction { code, .. } => code.as_str(),
            PipelineError::Program { .. } => "PROGRAM_ERROR",
            PipelineError::Connection { .. } => "CONNECTION_ERROR",
        }
    }

    /// Error category from the pipeline taxonomy.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "ValidationError",
            PipelineError::PublicKey(_) => "PublicKeyError",
            PipelineError::Transaction { .. } => "TransactionError",
            PipelineError::Program { .. } => "ProgramError",
            PipelineError::Connection { .. } => "ConnectionError",
        }
    }

    /// The representation handed back across the tool boundary.
    pub fn to_client_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("code".into(), json!(self.code()));
        out.insert("category".into(), json!(self.category()));
        out.insert("message".into(), json!(self.to_string()));

        match self {
            PipelineError::Transaction {
                details: Some(details),
                ..
            } => {
                out.insert("details".into(), details.clone());
            }
            PipelineError::Program {
                program_id,
                instruction_index,
                custom_code,
                logs,
                ..
            } => {
                out.insert("instructionIndex".into(), json!(instruction_index));
                if let Some(program_id) = program_id {
                    out.insert("programId".into(), json!(program_id.to_string()));
                }
                if let Some(custom_code) = custom_code {
                    out.insert("customCode".into(), json!(custom_code));
                }
                if !logs.is_empty() {
                    out.insert("logs".into(), json!(logs));
                }
            }
            PipelineError::Connection {
                cluster, endpoint, ..
            } => {
                out.insert("cluster".into(), json!(cluster));
                out.insert("endpoint".into(), json!(endpoint));
            }
            _ => {}
        }

        Value::Object(out)
    }

    /// Map an RPC failure that is not handled more specifically by the caller.
    pub fn from_rpc(cluster: &str, err: RpcError) -> Self {
        match err.kind {
            RpcErrorKind::BlockhashNotFound | RpcErrorKind::BlockHeightExceeded => {
                PipelineError::Transaction {
                    code: TransactionErrorCode::Expired,
                    message: err.message,
                    details: Some(json!({"endpoint": err.endpoint})),
                }
            }
            RpcErrorKind::PreflightFailure => PipelineError::Transaction {
                code: TransactionErrorCode::SimulationFailed,
                message: err.message,
                details: err.data,
            },
            RpcErrorKind::Rpc => PipelineError::Transaction {
                code: TransactionErrorCode::SubmissionFailed,
                message: err.message,
                details: err.code.map(|code| json!({"rpcCode": code})),
            },
            RpcErrorKind::Timeout
            | RpcErrorKind::Transport
            | RpcErrorKind::InvalidResponse
            | RpcErrorKind::RateLimited
            | RpcErrorKind::NetworkCongestion => PipelineError::Connection {
                cluster: cluster.to_string(),
                endpoint: err.endpoint,
                message: format!("{}: {}", err.kind, err.message),
            },
        }
    }
}

impl From<TxError> for PipelineError {
    fn from(e: TxError) -> Self {
        match e {
            TxError::InvalidPublicKey(msg) => PipelineError::PublicKey(msg),
            e if e.is_validation() => PipelineError::Validation(e.to_string()),
            TxError::MissingAnchor => {
                PipelineError::transaction(TransactionErrorCode::MissingAnchor, e.to_string())
            }
            TxError::Format(_) | TxError::Serialization(_) => {
                PipelineError::transaction(TransactionErrorCode::Format, e.to_string())
            }
            // Already handled by the `is_validation` guard above; listed for
            // exhaustiveness with the same mapping.
            TxError::InvalidSigningKey(_) | TxError::Validation(_) => {
                PipelineError::Validation(e.to_string())
            }
        }
    }
}
