//! Maps raw RPC status records and transaction metadata to caller-facing
//! reports. Pure functions only.

use serde::Serialize;
use serde_json::Value;
use sol_rpc::{Commitment, ConfirmedTransaction, SignatureStatus};
use sol_tx::compute_budget::COMPUTE_BUDGET_PROGRAM_ID;
use sol_tx::{CompiledMessage, Pubkey, Signature};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    NotFound,
    Pending,
    Processed,
    Confirmed,
    Finalized,
    Failed,
}

impl TxStatus {
    /// Whether a landed, successful transaction at this status has reached
    /// `target`.
    pub fn reaches(self, target: Commitment) -> bool {
        let reached = match self {
            TxStatus::Pending | TxStatus::Processed => Commitment::Processed,
            TxStatus::Confirmed => Commitment::Confirmed,
            TxStatus::Finalized => Commitment::Finalized,
            TxStatus::NotFound | TxStatus::Failed => return false,
        };
        reached.satisfies(target)
    }
}

/// A failing instruction, decoded from `{"InstructionError": [index, err]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionFailure {
    pub instruction_index: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_id: Option<Pubkey>,
    /// Named error class such as `InvalidAccountData`; `Custom` for program
    /// specific codes.
    pub error_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// A decoded on-chain transaction error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxFailure {
    Instruction(InstructionFailure),
    /// Any other error shape, kept verbatim.
    Transaction { details: Value },
}

impl TxFailure {
    pub fn message(&self) -> String {
        match self {
            TxFailure::Instruction(ix) => match ix.custom_code {
                Some(code) => format!(
                    "instruction {} failed: custom program error {code:#x}",
                    ix.instruction_index
                ),
                None => format!("instruction {} failed: {}", ix.instruction_index, ix.error_name),
            },
            TxFailure::Transaction { details } => format!("transaction failed: {details}"),
        }
    }

    /// Promote to a pipeline error; instruction failures become program errors.
    pub fn into_error(self, logs: Vec<String>) -> PipelineError {
        let message = self.message();
        match self {
            TxFailure::Instruction(ix) => PipelineError::Program {
                program_id: ix.program_id,
                instruction_index: ix.instruction_index,
                custom_code: ix.custom_code,
                message,
                logs,
            },
            TxFailure::Transaction { details } => PipelineError::Transaction {
                code: crate::error::TransactionErrorCode::SimulationFailed,
                message,
                details: Some(details),
            },
        }
    }
}

/// Decode an RPC error value. `message` resolves the failing program id.
pub fn decode_failure(err: &Value, message: Option<&CompiledMessage>) -> TxFailure {
    match instruction_failure(err, message) {
        Some(failure) => TxFailure::Instruction(failure),
        None => TxFailure::Transaction {
            details: err.clone(),
        },
    }
}

fn instruction_failure(
    err: &Value,
    message: Option<&CompiledMessage>,
) -> Option<InstructionFailure> {
    let parts = err.get("InstructionError")?.as_array()?;
    let [index, inner] = parts.as_slice() else {
        return None;
    };
    let instruction_index = u8::try_from(index.as_u64()?).ok()?;
    let program_id = message.and_then(|m| m.program_id(instruction_index as usize).copied());

    let (error_name, custom_code, detail) = match inner {
        Value::String(name) => (name.clone(), None, None),
        Value::Object(map) if map.len() == 1 => {
            let (name, value) = map.iter().next()?;
            if name == "Custom" {
                let code = value.as_u64().and_then(|c| u32::try_from(c).ok());
                (name.clone(), code, None)
            } else {
                (name.clone(), None, Some(value.clone()))
            }
        }
        other => ("Unknown".to_string(), None, Some(other.clone())),
    };

    Some(InstructionFailure {
        instruction_index,
        program_id,
        error_name,
        custom_code,
        detail,
    })
}

/// Map a status record to a [`TxStatus`].
pub fn classify_status(status: Option<&SignatureStatus>) -> TxStatus {
    let Some(status) = status else {
        return TxStatus::NotFound;
    };
    if status.err.is_some() {
        return TxStatus::Failed;
    }
    match status.confirmation_status {
        Some(Commitment::Processed) => TxStatus::Processed,
        Some(Commitment::Confirmed) => TxStatus::Confirmed,
        Some(Commitment::Finalized) => TxStatus::Finalized,
        None => match status.confirmations {
            None => TxStatus::Finalized,
            Some(0) => TxStatus::Pending,
            Some(_) => TxStatus::Confirmed,
        },
    }
}

/// Details only available from full transaction metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetails {
    pub slot: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    /// Static keys, then loaded writable, then loaded readonly.
    pub accounts: Vec<Pubkey>,
    pub instruction_count: usize,
    pub uses_compute_budget: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_units_consumed: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log_messages: Vec<String>,
}

pub fn describe_transaction(tx: &ConfirmedTransaction) -> TransactionDetails {
    let message = &tx.transaction.message;

    let mut accounts = message.account_keys.clone();
    if let Some(loaded) = tx.meta.as_ref().and_then(|m| m.loaded_addresses.as_ref()) {
        accounts.extend_from_slice(&loaded.writable);
        accounts.extend_from_slice(&loaded.readonly);
    }

    let uses_compute_budget = (0..message.instructions.len())
        .any(|i| message.program_id(i) == Some(&COMPUTE_BUDGET_PROGRAM_ID));

    TransactionDetails {
        slot: tx.slot,
        block_time: tx.block_time,
        fee: tx.meta.as_ref().map(|m| m.fee),
        accounts,
        instruction_count: message.instructions.len(),
        uses_compute_budget,
        compute_units_consumed: tx.meta.as_ref().and_then(|m| m.compute_units_consumed),
        log_messages: tx
            .meta
            .as_ref()
            .and_then(|m| m.log_messages.clone())
            .unwrap_or_default(),
    }
}

/// Outcome of a status lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub signature: Signature,
    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TxFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<TransactionDetails>,
}

/// Build a report from a status record and, when fetched, full metadata.
///
/// When metadata is present its error wins, since it comes with the message
/// needed to name the failing program.
pub fn interpret(
    signature: Signature,
    status: Option<&SignatureStatus>,
    transaction: Option<&ConfirmedTransaction>,
) -> StatusReport {
    let mut kind = classify_status(status);

    let meta_err = transaction.and_then(|tx| tx.meta.as_ref().and_then(|m| m.err.as_ref()));
    let status_err = status.and_then(|s| s.err.as_ref());

    let error = match (meta_err, transaction) {
        (Some(err), Some(tx)) => Some(decode_failure(err, Some(&tx.transaction.message))),
        _ => status_err.map(|err| {
            decode_failure(err, transaction.map(|tx| &tx.transaction.message))
        }),
    };
    if error.is_some() {
        kind = TxStatus::Failed;
    } else if kind == TxStatus::NotFound && transaction.is_some() {
        // Found by getTransaction but aged out of the status cache.
        kind = TxStatus::Finalized;
    }

    StatusReport {
        signature,
        status: kind,
        slot: status.map(|s| s.slot).or(transaction.map(|tx| tx.slot)),
        confirmations: status.and_then(|s| s.confirmations),
        error,
        details: transaction.map(describe_transaction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sol_rpc::{LoadedAddresses, TransactionMeta};
    use sol_tx::{compile_transaction, compute_budget, system, Anchor, Hash, MessageVersion};

    fn status(
        confirmations: Option<u64>,
        level: Option<Commitment>,
        err: Option<Value>,
    ) -> SignatureStatus {
        SignatureStatus {
            slot: 100,
            confirmations,
            err,
            confirmation_status: level,
        }
    }

    fn landed(meta: Option<TransactionMeta>) -> ConfirmedTransaction {
        let payer = Pubkey::new([1; 32]);
        let ixs = vec![
            compute_budget::set_compute_unit_limit(200_000),
            system::transfer(&payer, &Pubkey::new([2; 32]), 10).unwrap(),
        ];
        let transaction = compile_transaction(
            &payer,
            &ixs,
            &Anchor::Blockhash(Hash::new([9; 32])),
            MessageVersion::Legacy,
            &[],
        )
        .unwrap();
        ConfirmedTransaction {
            slot: 100,
            block_time: Some(1_700_000_000),
            transaction,
            meta,
        }
    }

    // -- status mapping -------------------------------------------------------

    #[test]
    fn absent_is_not_found() {
        assert_eq!(classify_status(None), TxStatus::NotFound);
    }

    #[test]
    fn confirmation_status_maps_directly() {
        let s = status(Some(3), Some(Commitment::Processed), None);
        assert_eq!(classify_status(Some(&s)), TxStatus::Processed);
        let s = status(None, Some(Commitment::Finalized), None);
        assert_eq!(classify_status(Some(&s)), TxStatus::Finalized);
    }

    #[test]
    fn confirmations_fallback() {
        assert_eq!(classify_status(Some(&status(None, None, None))), TxStatus::Finalized);
        assert_eq!(classify_status(Some(&status(Some(0), None, None))), TxStatus::Pending);
        assert_eq!(classify_status(Some(&status(Some(5), None, None))), TxStatus::Confirmed);
    }

    #[test]
    fn error_means_failed() {
        let s = status(Some(1), Some(Commitment::Confirmed), Some(json!("AccountInUse")));
        assert_eq!(classify_status(Some(&s)), TxStatus::Failed);
    }

    #[test]
    fn reaches_commitment() {
        assert!(TxStatus::Finalized.reaches(Commitment::Confirmed));
        assert!(!TxStatus::Processed.reaches(Commitment::Confirmed));
        assert!(!TxStatus::Failed.reaches(Commitment::Processed));
    }

    // -- error decoding -------------------------------------------------------

    #[test]
    fn custom_program_error() {
        let failure = decode_failure(&json!({"InstructionError": [1, {"Custom": 6001}]}), None);
        let TxFailure::Instruction(ix) = failure else {
            panic!("expected instruction failure");
        };
        assert_eq!(ix.instruction_index, 1);
        assert_eq!(ix.custom_code, Some(6001));
        assert_eq!(ix.error_name, "Custom");
        assert!(ix.program_id.is_none());
    }

    #[test]
    fn named_instruction_error() {
        let failure = decode_failure(&json!({"InstructionError": [0, "InvalidAccountData"]}), None);
        let TxFailure::Instruction(ix) = failure else {
            panic!("expected instruction failure");
        };
        assert_eq!(ix.error_name, "InvalidAccountData");
        assert_eq!(ix.custom_code, None);
    }

    #[test]
    fn instruction_error_with_payload() {
        let failure =
            decode_failure(&json!({"InstructionError": [0, {"BorshIoError": "bad"}]}), None);
        let TxFailure::Instruction(ix) = failure else {
            panic!("expected instruction failure");
        };
        assert_eq!(ix.error_name, "BorshIoError");
        assert_eq!(ix.detail, Some(json!("bad")));
    }

    #[test]
    fn other_shapes_are_verbatim() {
        let err = json!({"InsufficientFundsForRent": {"account_index": 2}});
        assert_eq!(
            decode_failure(&err, None),
            TxFailure::Transaction { details: err.clone() }
        );
        let err = json!("BlockhashNotFound");
        assert_eq!(
            decode_failure(&err, None),
            TxFailure::Transaction { details: err.clone() }
        );
    }

    #[test]
    fn program_id_resolved_from_message() {
        let tx = landed(None);
        let failure = decode_failure(
            &json!({"InstructionError": [1, {"Custom": 1}]}),
            Some(&tx.transaction.message),
        );
        let TxFailure::Instruction(ix) = failure else {
            panic!("expected instruction failure");
        };
        assert_eq!(ix.program_id, Some(system::SYSTEM_PROGRAM_ID));
    }

    #[test]
    fn failure_serializes_with_kind_tag() {
        let failure = decode_failure(&json!({"InstructionError": [0, {"Custom": 1}]}), None);
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["kind"], "instruction");
        assert_eq!(value["instructionIndex"], 0);
        assert_eq!(value["customCode"], 1);
    }

    // -- full metadata --------------------------------------------------------

    #[test]
    fn details_from_metadata() {
        let loaded = Pubkey::new([7; 32]);
        let meta = TransactionMeta {
            err: None,
            fee: 5_000,
            log_messages: Some(vec!["Program log: ok".into()]),
            compute_units_consumed: Some(450),
            loaded_addresses: Some(LoadedAddresses {
                writable: vec![],
                readonly: vec![loaded],
            }),
        };
        let tx = landed(Some(meta));
        let details = describe_transaction(&tx);

        assert_eq!(details.fee, Some(5_000));
        assert_eq!(details.instruction_count, 2);
        assert!(details.uses_compute_budget);
        assert_eq!(details.compute_units_consumed, Some(450));
        assert_eq!(details.accounts.last(), Some(&loaded));
        assert_eq!(details.accounts.len(), tx.transaction.message.account_keys.len() + 1);
    }

    #[test]
    fn interpret_failed_with_metadata() {
        let meta = TransactionMeta {
            err: Some(json!({"InstructionError": [1, {"Custom": 1}]})),
            fee: 5_000,
            ..TransactionMeta::default()
        };
        let tx = landed(Some(meta));
        let s = status(
            None,
            Some(Commitment::Finalized),
            Some(json!({"InstructionError": [1, {"Custom": 1}]})),
        );

        let report = interpret(Signature::new([3; 64]), Some(&s), Some(&tx));
        assert_eq!(report.status, TxStatus::Failed);
        let Some(TxFailure::Instruction(ix)) = report.error else {
            panic!("expected instruction failure");
        };
        assert_eq!(ix.program_id, Some(system::SYSTEM_PROGRAM_ID));
        assert!(report.details.is_some());
    }

    #[test]
    fn interpret_metadata_without_status_is_finalized() {
        let tx = landed(Some(TransactionMeta::default()));
        let report = interpret(Signature::new([3; 64]), None, Some(&tx));
        assert_eq!(report.status, TxStatus::Finalized);
        assert_eq!(report.slot, Some(100));
    }

    #[test]
    fn interpret_not_found() {
        let report = interpret(Signature::new([3; 64]), None, None);
        assert_eq!(report.status, TxStatus::NotFound);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "not_found");
        assert!(json.get("error").is_none());
    }
}
