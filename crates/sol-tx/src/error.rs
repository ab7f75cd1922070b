use thiserror::Error;

/// Errors raised while building, encoding or signing a Solana transaction.
///
/// None of these are retryable: malformed input does not become valid by
/// waiting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signing key: {0}")]
    InvalidSigningKey(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("message has no anchor value; set a blockhash or nonce before signing")]
    MissingAnchor,

    #[error("transaction format error: {0}")]
    Format(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TxError {
    /// Whether the error comes from a malformed caller-supplied value rather
    /// than a malformed serialized transaction.
    pub fn is_validation(&self) -> bool {
        matches!(self, TxError::Validation(_) | TxError::InvalidSigningKey(_))
    }
}
