//! Solana transaction lifecycle: compile, sign, send and check status.
//!
//! Each stage is usable on its own through [`Tools`], which speaks JSON at
//! its boundary and keeps no state between calls beyond a shared
//! [`sol_rpc::ClientCache`].

pub mod config;
pub mod error;
pub mod logging;
pub mod requests;
pub mod status;
pub mod submit;
pub mod tools;

pub use config::PipelineConfig;
pub use error::{PipelineError, TransactionErrorCode};
pub use status::{StatusReport, TxFailure, TxStatus};
pub use submit::{RetryPolicy, SendOptions, SendOutcome, SimulationReport, Submission, Submitter};
pub use tools::Tools;
