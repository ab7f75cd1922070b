//! Solana transaction construction without `solana-sdk`.
//!
//! Compiles instruction descriptors into legacy or v0 messages, tracks
//! partial signatures by signer identity, and reads and writes the compact
//! binary wire format. Signing uses `ed25519-dalek`; addresses are Base58 via
//! `bs58`.

pub mod address;
pub mod compiler;
pub mod compute_budget;
pub mod error;
pub mod instruction;
pub mod keys;
pub mod message;
pub mod signer;
pub mod spl_token;
pub mod system;
pub mod transaction;
pub mod wire;

pub use address::{resolve_address, Hash, Pubkey, Signature};
pub use compiler::{compile_message, compile_transaction, Anchor, LookupTableRef, NonceContext};
pub use error::TxError;
pub use instruction::{AccountMeta, CompiledInstruction, Instruction};
pub use keys::{verify_signature, KeyInput, Keypair};
pub use message::{CompiledMessage, MessageAddressTableLookup, MessageHeader, MessageVersion};
pub use signer::{sign, SigningStatus};
pub use transaction::Transaction;
