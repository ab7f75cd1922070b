use async_trait::async_trait;
use sol_tx::Signature;

use crate::error::RpcError;
use crate::types::{
    Commitment, ConfirmedTransaction, LatestBlockhash, SendConfig, SignatureStatus,
    SimulateConfig, SimulationResult,
};

/// The RPC calls the transaction pipeline needs.
///
/// Implementations must be safe to share across concurrent callers and must
/// report failures with a classified [`RpcError`].
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// URL this client talks to, for diagnostics.
    fn endpoint(&self) -> &str;

    /// Submit wire bytes; returns the transaction signature.
    async fn send_transaction(
        &self,
        wire: &[u8],
        config: &SendConfig,
    ) -> Result<Signature, RpcError>;

    async fn simulate_transaction(
        &self,
        wire: &[u8],
        config: &SimulateConfig,
    ) -> Result<SimulationResult, RpcError>;

    /// One entry per requested signature; `None` when the node has no record.
    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
        search_history: bool,
    ) -> Result<Vec<Option<SignatureStatus>>, RpcError>;

    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> Result<Option<ConfirmedTransaction>, RpcError>;

    async fn get_latest_blockhash(
        &self,
        commitment: Commitment,
    ) -> Result<LatestBlockhash, RpcError>;
}
