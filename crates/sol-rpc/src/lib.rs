//! Solana JSON-RPC access for the transaction pipeline.
//!
//! [`RpcClient`] is the seam the pipeline depends on; [`HttpRpcClient`] is
//! the production implementation and [`ClientCache`] hands out shared
//! clients per endpoint. Every failure is reported as an [`RpcError`] with a
//! closed [`RpcErrorKind`] so callers can decide on retries without parsing
//! messages.

pub mod cache;
pub mod client;
pub mod cluster;
pub mod error;
pub mod http;
pub mod types;

pub use cache::{ClientCache, ClientOptions};
pub use client::RpcClient;
pub use cluster::Cluster;
pub use error::{RpcError, RpcErrorKind};
pub use http::HttpRpcClient;
pub use types::{
    Commitment, ConfirmedTransaction, LatestBlockhash, LoadedAddresses, SendConfig,
    SignatureStatus, SimulateConfig, SimulationResult, TransactionMeta,
};
