//! Submission engine: send with bounded, classified retry, then optionally
//! wait for confirmation against a timeout.
//!
//! The engine keeps no state between calls. Retries are strictly sequential
//! and the confirmation wait starts only after a send has succeeded.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sol_rpc::{Commitment, RpcClient, RpcError, SendConfig, SimulateConfig};
use sol_tx::{Signature, SigningStatus, Transaction};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, TransactionErrorCode};
use crate::status::{self, StatusReport, TxFailure};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 30_000;
pub const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_confirmation_timeout_ms() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_MS
}

/// Caller-controlled submission options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendOptions {
    pub skip_preflight: bool,
    /// Level the confirmation wait must reach.
    pub commitment: Commitment,
    pub preflight_commitment: Option<Commitment>,
    /// Retries after the first attempt; only retryable failures use them.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub await_confirmation: bool,
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    /// Simulate instead of sending; allowed for partially signed transactions.
    pub simulate_only: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            skip_preflight: false,
            commitment: Commitment::Confirmed,
            preflight_commitment: None,
            max_retries: default_max_retries(),
            await_confirmation: false,
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            simulate_only: false,
        }
    }
}

/// Exponential backoff: `min(base * 2^retry, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5_000),
        }
    }

    /// Delay before retry `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Result of a send.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub signature: Signature,
    /// `None` when confirmation was not requested. `Some(false)` covers both
    /// an on-chain failure (with details) and a timeout (without details).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_details: Option<StatusReport>,
    pub attempts: u32,
}

/// Result of a simulation-only run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TxFailure>,
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units_consumed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Submission {
    Sent(SendOutcome),
    Simulated(SimulationReport),
}

/// Sends transactions through one RPC client.
pub struct Submitter {
    client: Arc<dyn RpcClient>,
    cluster: String,
}

impl Submitter {
    pub fn new(client: Arc<dyn RpcClient>, cluster: impl Into<String>) -> Self {
        Self {
            client,
            cluster: cluster.into(),
        }
    }

    pub async fn submit(
        &self,
        tx: &Transaction,
        options: &SendOptions,
    ) -> Result<Submission, PipelineError> {
        if options.simulate_only {
            return self.simulate(tx, options).await.map(Submission::Simulated);
        }
        self.send(tx, options).await.map(Submission::Sent)
    }

    /// Send a fully signed transaction.
    pub async fn send(
        &self,
        tx: &Transaction,
        options: &SendOptions,
    ) -> Result<SendOutcome, PipelineError> {
        if !tx.is_fully_signed() {
            let status = SigningStatus::of(tx);
            let remaining: Vec<String> =
                status.remaining_signers.iter().map(ToString::to_string).collect();
            return Err(PipelineError::Transaction {
                code: TransactionErrorCode::NotFullySigned,
                message: format!(
                    "transaction is missing {} of {} required signatures",
                    remaining.len(),
                    status.total_required
                ),
                details: Some(serde_json::json!({ "remainingSigners": remaining })),
            });
        }

        let wire = tx.serialize()?;
        let (signature, attempts) = self.send_with_retry(&wire, options).await?;

        if !options.await_confirmation {
            return Ok(SendOutcome {
                signature,
                confirmed: None,
                confirmation_details: None,
                attempts,
            });
        }

        let timeout = Duration::from_millis(options.confirmation_timeout_ms);
        let confirmation = self.poll_confirmation(&signature, options.commitment);
        match tokio::time::timeout(timeout, confirmation).await {
            Ok(report) => {
                let report = report?;
                let confirmed = report.error.is_none();
                info!(%signature, confirmed, status = ?report.status, "confirmation resolved");
                Ok(SendOutcome {
                    signature,
                    confirmed: Some(confirmed),
                    confirmation_details: Some(report),
                    attempts,
                })
            }
            Err(_) => {
                warn!(
                    %signature,
                    timeout_ms = options.confirmation_timeout_ms,
                    "confirmation wait timed out; outcome unknown"
                );
                Ok(SendOutcome {
                    signature,
                    confirmed: Some(false),
                    confirmation_details: None,
                    attempts,
                })
            }
        }
    }

    async fn send_with_retry(
        &self,
        wire: &[u8],
        options: &SendOptions,
    ) -> Result<(Signature, u32), PipelineError> {
        let policy = RetryPolicy::new(options.max_retries);
        let config = SendConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: options.preflight_commitment,
        };

        let mut retry = 0u32;
        loop {
            let attempt = retry + 1;
            match self.client.send_transaction(wire, &config).await {
                Ok(signature) => {
                    debug!(
                        %signature,
                        attempt,
                        endpoint = self.client.endpoint(),
                        "transaction sent"
                    );
                    return Ok((signature, attempt));
                }
                Err(err) if err.is_retryable() && retry < policy.max_retries => {
                    let delay = policy.delay_for(retry);
                    warn!(
                        attempt,
                        kind = %err.kind,
                        delay_ms = delay.as_millis() as u64,
                        error = %err.message,
                        "send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) if err.is_retryable() => {
                    warn!(attempts = attempt, kind = %err.kind, "send retries exhausted");
                    return Err(self.exhausted(err, attempt));
                }
                Err(err) => {
                    debug!(attempt, kind = %err.kind, "send failed with non-retryable error");
                    return Err(self.send_failure(err));
                }
            }
        }
    }

    /// Poll until the signature reaches `commitment` or carries an error.
    async fn poll_confirmation(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> Result<StatusReport, PipelineError> {
        loop {
            match self
                .client
                .get_signature_statuses(std::slice::from_ref(signature), false)
                .await
            {
                Ok(statuses) => {
                    let entry = statuses.into_iter().next().flatten();
                    let report = status::interpret(*signature, entry.as_ref(), None);
                    if report.error.is_some() || report.status.reaches(commitment) {
                        return Ok(report);
                    }
                    debug!(%signature, status = ?report.status, "awaiting confirmation");
                }
                Err(err) if err.is_retryable() => {
                    warn!(%signature, kind = %err.kind, "status poll failed, continuing");
                }
                Err(err) => return Err(PipelineError::from_rpc(&self.cluster, err)),
            }
            tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
        }
    }

    /// Run the transaction through `simulateTransaction` without signature
    /// verification.
    pub async fn simulate(
        &self,
        tx: &Transaction,
        options: &SendOptions,
    ) -> Result<SimulationReport, PipelineError> {
        let wire = tx.serialize()?;
        let config = SimulateConfig {
            sig_verify: false,
            commitment: options.preflight_commitment.or(Some(options.commitment)),
        };
        let result = self
            .client
            .simulate_transaction(&wire, &config)
            .await
            .map_err(|e| PipelineError::from_rpc(&self.cluster, e))?;

        let error = result
            .err
            .as_ref()
            .map(|err| status::decode_failure(err, Some(&tx.message)));
        debug!(success = error.is_none(), units = ?result.units_consumed, "simulation finished");

        Ok(SimulationReport {
            success: error.is_none(),
            error,
            logs: result.logs.unwrap_or_default(),
            units_consumed: result.units_consumed,
        })
    }

    fn exhausted(&self, err: RpcError, attempts: u32) -> PipelineError {
        PipelineError::Transaction {
            code: TransactionErrorCode::SubmissionFailed,
            message: format!("send failed after {attempts} attempts: {}", err.message),
            details: Some(serde_json::json!({
                "attempts": attempts,
                "lastErrorKind": err.kind,
                "cluster": self.cluster,
                "endpoint": err.endpoint,
            })),
        }
    }

    /// A preflight rejection naming an instruction is reported as a program
    /// error; everything else goes through the generic mapping.
    fn send_failure(&self, err: RpcError) -> PipelineError {
        let preflight_err = err
            .data
            .as_ref()
            .and_then(|data| data.get("err"))
            .filter(|e| !e.is_null());
        match preflight_err.map(|e| status::decode_failure(e, None)) {
            Some(failure @ TxFailure::Instruction(_)) => {
                let logs = err
                    .data
                    .as_ref()
                    .and_then(|d| d.get("logs"))
                    .and_then(|l| serde_json::from_value(l.clone()).ok())
                    .unwrap_or_default();
                failure.into_error(logs)
            }
            _ => PipelineError::from_rpc(&self.cluster, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use sol_rpc::{
        ConfirmedTransaction, LatestBlockhash, RpcErrorKind, SignatureStatus, SimulationResult,
    };
    use sol_tx::{compile_transaction, sign, system, Anchor, Hash, Keypair, MessageVersion, Pubkey};
    use tokio::time::Instant;

    const ENDPOINT: &str = "http://stub";

    #[derive(Default)]
    struct StubRpc {
        sends: Mutex<VecDeque<Result<Signature, RpcError>>>,
        send_calls: Mutex<u32>,
        statuses: Mutex<VecDeque<Result<Option<SignatureStatus>, RpcError>>>,
        simulation: Mutex<Option<SimulationResult>>,
    }

    impl StubRpc {
        fn failing_sends(kind: RpcErrorKind, message: &str, n: usize) -> Self {
            let stub = Self::default();
            for _ in 0..n {
                stub.sends
                    .lock()
                    .unwrap()
                    .push_back(Err(RpcError::new(kind, ENDPOINT, message)));
            }
            stub
        }

        fn calls(&self) -> u32 {
            *self.send_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl RpcClient for StubRpc {
        fn endpoint(&self) -> &str {
            ENDPOINT
        }

        async fn send_transaction(
            &self,
            _wire: &[u8],
            _config: &SendConfig,
        ) -> Result<Signature, RpcError> {
            *self.send_calls.lock().unwrap() += 1;
            self.sends
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Signature::new([0x5A; 64])))
        }

        async fn simulate_transaction(
            &self,
            _wire: &[u8],
            _config: &SimulateConfig,
        ) -> Result<SimulationResult, RpcError> {
            Ok(self.simulation.lock().unwrap().clone().unwrap_or_default())
        }

        async fn get_signature_statuses(
            &self,
            signatures: &[Signature],
            _search_history: bool,
        ) -> Result<Vec<Option<SignatureStatus>>, RpcError> {
            let next = self.statuses.lock().unwrap().pop_front().unwrap_or(Ok(None));
            next.map(|status| vec![status; signatures.len()])
        }

        async fn get_transaction(
            &self,
            _signature: &Signature,
            _commitment: Commitment,
        ) -> Result<Option<ConfirmedTransaction>, RpcError> {
            Ok(None)
        }

        async fn get_latest_blockhash(
            &self,
            _commitment: Commitment,
        ) -> Result<LatestBlockhash, RpcError> {
            Ok(LatestBlockhash {
                blockhash: Hash::new([1; 32]),
                last_valid_block_height: 100,
            })
        }
    }

    fn signed_tx() -> Transaction {
        let payer = Keypair::from_bytes(&[7u8; 32]).unwrap();
        let ix = system::transfer(&payer.pubkey(), &Pubkey::new([2; 32]), 1_000).unwrap();
        let mut tx = compile_transaction(
            &payer.pubkey(),
            &[ix],
            &Anchor::Blockhash(Hash::new([9; 32])),
            MessageVersion::Legacy,
            &[],
        )
        .unwrap();
        sign(&mut tx, &[payer]).unwrap();
        tx
    }

    fn submitter(stub: Arc<StubRpc>) -> Submitter {
        Submitter::new(stub, "localnet")
    }

    // -- backoff --------------------------------------------------------------

    #[test]
    fn backoff_schedule() {
        let policy = RetryPolicy::new(10);
        let delays: Vec<u64> = (0..6).map(|n| policy.delay_for(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 5_000, 5_000]);
        assert_eq!(policy.delay_for(40), Duration::from_millis(5_000));
    }

    #[test]
    fn options_defaults_from_empty_json() {
        let options: SendOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, SendOptions::default());
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.confirmation_timeout_ms, 30_000);
    }

    // -- retry ----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn blockhash_not_found_exhausts_retries() {
        let stub = Arc::new(StubRpc::failing_sends(
            RpcErrorKind::BlockhashNotFound,
            "Blockhash not found",
            10,
        ));
        let engine = submitter(stub.clone());
        let options = SendOptions::default();

        let start = Instant::now();
        let err = engine.send(&signed_tx(), &options).await.unwrap_err();
        let elapsed = start.elapsed();

        assert_eq!(stub.calls(), 4);
        assert_eq!(err.code(), "SUBMISSION_FAILED");
        assert_eq!(err.category(), "TransactionError");
        // 500 + 1000 + 2000
        assert!(elapsed >= Duration::from_millis(3_500));
        assert!(elapsed < Duration::from_millis(3_600));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_then_success() {
        let stub = Arc::new(StubRpc::failing_sends(RpcErrorKind::RateLimited, "429", 2));
        let engine = submitter(stub.clone());

        let start = Instant::now();
        let outcome = engine.send(&signed_tx(), &SendOptions::default()).await.unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.confirmed, None);
        assert!(start.elapsed() >= Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_immediately() {
        let stub =
            Arc::new(StubRpc::failing_sends(RpcErrorKind::Transport, "connection refused", 5));
        let engine = submitter(stub.clone());

        let start = Instant::now();
        let err = engine.send(&signed_tx(), &SendOptions::default()).await.unwrap_err();

        assert_eq!(stub.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(err.code(), "CONNECTION_ERROR");
        assert_eq!(err.to_client_json()["cluster"], "localnet");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_one_attempt() {
        let stub = Arc::new(StubRpc::failing_sends(RpcErrorKind::Timeout, "timed out", 3));
        let engine = submitter(stub.clone());
        let options = SendOptions {
            max_retries: 0,
            ..SendOptions::default()
        };
        assert!(engine.send(&signed_tx(), &options).await.is_err());
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn preflight_instruction_error_becomes_program_error() {
        let stub = StubRpc::default();
        stub.sends.lock().unwrap().push_back(Err(RpcError::from_response(
            ENDPOINT,
            sol_rpc::error::PREFLIGHT_FAILURE_CODE,
            "Transaction simulation failed: \
             Error processing Instruction 0: custom program error: 0x1",
            Some(json!({
                "err": {"InstructionError": [0, {"Custom": 1}]},
                "logs": ["Program log: boom"]
            })),
        )));
        let engine = submitter(Arc::new(stub));

        let err = engine.send(&signed_tx(), &SendOptions::default()).await.unwrap_err();
        let json = err.to_client_json();
        assert_eq!(err.code(), "PROGRAM_ERROR");
        assert_eq!(json["customCode"], 1);
        assert_eq!(json["logs"][0], "Program log: boom");
    }

    // -- signing gate ---------------------------------------------------------

    #[tokio::test]
    async fn partially_signed_is_rejected() {
        let payer = Keypair::from_bytes(&[7u8; 32]).unwrap();
        let ix = system::transfer(&payer.pubkey(), &Pubkey::new([2; 32]), 1_000).unwrap();
        let tx = compile_transaction(
            &payer.pubkey(),
            &[ix],
            &Anchor::Blockhash(Hash::new([9; 32])),
            MessageVersion::Legacy,
            &[],
        )
        .unwrap();
        let stub = Arc::new(StubRpc::default());
        let engine = submitter(stub.clone());

        let err = engine.send(&tx, &SendOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FULLY_SIGNED");
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn simulate_only_accepts_unsigned() {
        let payer = Keypair::from_bytes(&[7u8; 32]).unwrap();
        let ix = system::transfer(&payer.pubkey(), &Pubkey::new([2; 32]), 1_000).unwrap();
        let tx = compile_transaction(
            &payer.pubkey(),
            &[ix],
            &Anchor::Blockhash(Hash::new([9; 32])),
            MessageVersion::Legacy,
            &[],
        )
        .unwrap();
        let stub = Arc::new(StubRpc::default());
        *stub.simulation.lock().unwrap() = Some(SimulationResult {
            err: Some(json!({"InstructionError": [0, "InsufficientFunds"]})),
            logs: Some(vec!["Program 11111111111111111111111111111111 failed".into()]),
            units_consumed: Some(150),
        });
        let engine = submitter(stub.clone());
        let options = SendOptions {
            simulate_only: true,
            ..SendOptions::default()
        };

        let Submission::Simulated(report) = engine.submit(&tx, &options).await.unwrap() else {
            panic!("expected a simulation report");
        };
        assert!(!report.success);
        assert_eq!(report.units_consumed, Some(150));
        let Some(TxFailure::Instruction(ix)) = report.error else {
            panic!("expected instruction failure");
        };
        assert_eq!(ix.program_id, Some(system::SYSTEM_PROGRAM_ID));
        assert_eq!(stub.calls(), 0);
    }

    // -- confirmation ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn confirmation_timeout_is_not_an_error() {
        let stub = Arc::new(StubRpc::default());
        let engine = submitter(stub);
        let options = SendOptions {
            await_confirmation: true,
            confirmation_timeout_ms: 100,
            ..SendOptions::default()
        };

        let start = Instant::now();
        let outcome = engine.send(&signed_tx(), &options).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(outcome.confirmed, Some(false));
        assert!(outcome.confirmation_details.is_none());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_polls_until_commitment() {
        let stub = StubRpc::default();
        {
            let mut statuses = stub.statuses.lock().unwrap();
            statuses.push_back(Ok(None));
            statuses.push_back(Err(RpcError::new(
                RpcErrorKind::RateLimited,
                ENDPOINT,
                "slow down",
            )));
            statuses.push_back(Ok(Some(SignatureStatus {
                slot: 10,
                confirmations: Some(0),
                err: None,
                confirmation_status: Some(Commitment::Processed),
            })));
            statuses.push_back(Ok(Some(SignatureStatus {
                slot: 10,
                confirmations: Some(1),
                err: None,
                confirmation_status: Some(Commitment::Confirmed),
            })));
        }
        let engine = submitter(Arc::new(stub));
        let options = SendOptions {
            await_confirmation: true,
            ..SendOptions::default()
        };

        let outcome = engine.send(&signed_tx(), &options).await.unwrap();
        assert_eq!(outcome.confirmed, Some(true));
        let details = outcome.confirmation_details.unwrap();
        assert_eq!(details.status, crate::status::TxStatus::Confirmed);
        assert_eq!(details.slot, Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn onchain_failure_reports_unconfirmed_with_details() {
        let stub = StubRpc::default();
        stub.statuses.lock().unwrap().push_back(Ok(Some(SignatureStatus {
            slot: 11,
            confirmations: Some(1),
            err: Some(json!({"InstructionError": [0, {"Custom": 2}]})),
            confirmation_status: Some(Commitment::Confirmed),
        })));
        let engine = submitter(Arc::new(stub));
        let options = SendOptions {
            await_confirmation: true,
            ..SendOptions::default()
        };

        let outcome = engine.send(&signed_tx(), &options).await.unwrap();
        assert_eq!(outcome.confirmed, Some(false));
        let details = outcome.confirmation_details.unwrap();
        assert_eq!(details.status, crate::status::TxStatus::Failed);
        assert!(details.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_poll_error_propagates() {
        let stub = StubRpc::default();
        stub.statuses
            .lock()
            .unwrap()
            .push_back(Err(RpcError::new(RpcErrorKind::Transport, ENDPOINT, "reset")));
        let engine = submitter(Arc::new(stub));
        let options = SendOptions {
            await_confirmation: true,
            ..SendOptions::default()
        };

        let err = engine.send(&signed_tx(), &options).await.unwrap_err();
        assert_eq!(err.code(), "CONNECTION_ERROR");
    }
}
