//! The tool boundary: `compile`, `sign`, `send` and `status`, each taking and
//! returning JSON-serializable values. Serialized transactions travel between
//! tools as Base64 strings; nothing is stored here between calls.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sol_rpc::{ClientCache, Cluster, Commitment, RpcClient, RpcError};
use sol_tx::{
    compile_transaction, Anchor, CompiledMessage, Hash, Keypair, Signature, Transaction,
};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, TransactionErrorCode};
use crate::requests::{
    parse_hash, AnchorInput, CompileRequest, CompileResponse, SendRequest, SignRequest,
    SignResponse, StatusRequest,
};
use crate::status::{self, StatusReport};
use crate::submit::{Submission, Submitter};

pub const TOOL_NAMES: [&str; 4] = ["compile", "sign", "send", "status"];

/// Entry point for all pipeline operations.
pub struct Tools {
    config: PipelineConfig,
    clients: Arc<ClientCache>,
}

impl Tools {
    pub fn new(config: PipelineConfig, clients: Arc<ClientCache>) -> Self {
        Self { config, clients }
    }

    /// Resolve a cluster name (or the configured default) to a client.
    fn connect(
        &self,
        cluster: Option<&str>,
    ) -> Result<(Cluster, Arc<dyn RpcClient>), PipelineError> {
        let cluster = match cluster {
            Some(name) => name
                .parse::<Cluster>()
                .map_err(|e| PipelineError::Validation(format!("cluster: {e}")))?,
            None => self.config.cluster.clone(),
        };
        let endpoint = self.config.endpoint_for(&cluster);
        let client = self
            .clients
            .get_or_connect(&endpoint, &self.config.client_options())
            .map_err(|e| PipelineError::from_rpc(cluster.name(), e))?;
        Ok((cluster, client))
    }

    /// Map an RPC failure. Clients for an endpoint that could not be reached
    /// are dropped so the next call reconnects.
    fn rpc_failure(&self, cluster: &Cluster, err: RpcError) -> PipelineError {
        if err.is_connection_failure() {
            let dropped = self.clients.evict(&err.endpoint);
            warn!(
                endpoint = %err.endpoint,
                kind = %err.kind,
                dropped,
                "dropping cached rpc client"
            );
        }
        PipelineError::from_rpc(cluster.name(), err)
    }

    async fn latest_blockhash(
        &self,
        cluster: Option<&str>,
        commitment: Option<Commitment>,
    ) -> Result<Hash, PipelineError> {
        let (cluster, client) = self.connect(cluster)?;
        let latest = client
            .get_latest_blockhash(commitment.unwrap_or(self.config.send.commitment))
            .await
            .map_err(|e| self.rpc_failure(&cluster, e))?;
        debug!(
            blockhash = %latest.blockhash,
            last_valid_block_height = latest.last_valid_block_height,
            "fetched latest blockhash"
        );
        Ok(latest.blockhash)
    }

    pub async fn compile(&self, request: CompileRequest) -> Result<CompileResponse, PipelineError> {
        let fee_payer = sol_tx::resolve_address("feePayer", &request.fee_payer)?;

        let mut instructions = Vec::with_capacity(request.instructions.len());
        for (i, input) in request.instructions.iter().enumerate() {
            let path = format!("instructions[{i}]");
            instructions.extend(input.to_instructions(&path, &fee_payer)?);
        }

        let anchor = match &request.anchor {
            AnchorInput::Blockhash { value } => {
                Anchor::Blockhash(parse_hash("anchor.value", value)?)
            }
            AnchorInput::Nonce {
                nonce_account,
                nonce_authority,
                nonce_value,
            } => Anchor::Nonce(AnchorInput::resolve_nonce(
                nonce_account,
                nonce_authority,
                nonce_value,
            )?),
            AnchorInput::Latest { commitment } => Anchor::Blockhash(
                self.latest_blockhash(request.cluster.as_deref(), *commitment)
                    .await?,
            ),
            AnchorInput::None => Anchor::Unset,
        };

        let lookup_tables = request
            .lookup_tables
            .iter()
            .enumerate()
            .map(|(i, table)| table.resolve(&format!("lookupTables[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;

        let tx = compile_transaction(
            &fee_payer,
            &instructions,
            &anchor,
            request.version,
            &lookup_tables,
        )?;
        let message = tx.message_bytes()?;

        info!(
            fee_payer = %fee_payer,
            version = ?tx.message.version,
            instructions = tx.message.instructions.len(),
            required_signatures = tx.signatures.len(),
            "compiled transaction"
        );

        Ok(CompileResponse {
            serialized_message: BASE64.encode(&message),
            serialized_transaction: tx.to_base64()?,
            version: tx.message.version,
            required_signers: tx.message.required_signers().to_vec(),
            static_account_count: tx.message.account_keys.len(),
            lookup_account_count: tx.message.num_lookup_accounts(),
            instruction_count: tx.message.instructions.len(),
            anchor: tx.message.anchor,
        })
    }

    pub async fn sign(&self, request: SignRequest) -> Result<SignResponse, PipelineError> {
        let mut tx = match (&request.transaction, &request.message) {
            (Some(encoded), None) => Transaction::from_base64(encoded)?,
            (None, Some(encoded)) => {
                let bytes = BASE64.decode(encoded.trim()).map_err(|e| {
                    PipelineError::transaction(
                        TransactionErrorCode::Format,
                        format!("message: invalid base64: {e}"),
                    )
                })?;
                Transaction::new_unsigned(CompiledMessage::deserialize(&bytes)?)
            }
            _ => {
                return Err(PipelineError::Validation(
                    "provide exactly one of `transaction` or `message`".into(),
                ))
            }
        };

        if let Some(anchor) = &request.anchor {
            if let Some(existing) = tx.message.anchor {
                return Err(PipelineError::Validation(format!(
                    "anchor: message is already anchored to {existing}; \
                     rebinding it would discard its signatures"
                )));
            }
            let hash = match anchor {
                AnchorInput::Blockhash { value } => parse_hash("anchor.value", value)?,
                AnchorInput::Latest { commitment } => {
                    self.latest_blockhash(request.cluster.as_deref(), *commitment)
                        .await?
                }
                AnchorInput::Nonce { .. } | AnchorInput::None => {
                    return Err(PipelineError::Validation(
                        "anchor: sign accepts only a `blockhash` or `latest` anchor".into(),
                    ))
                }
            };
            tx = tx.with_anchor(hash);
            debug!(anchor = %hash, "anchored message before signing");
        }

        let keys = request
            .signing_keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                key.to_keypair()
                    .map_err(|e| PipelineError::Validation(format!("signingKeys[{i}]: {e}")))
            })
            .collect::<Result<Vec<Keypair>, _>>()?;

        let status = sol_tx::sign(&mut tx, &keys)?;
        info!(
            added = status.added,
            remaining = status.remaining_signers.len(),
            fully_signed = status.is_fully_signed,
            "signed transaction"
        );

        Ok(SignResponse {
            serialized_transaction: tx.to_base64()?,
            signature: tx.signature().copied(),
            signing_status: status,
        })
    }

    pub async fn send(&self, request: SendRequest) -> Result<Submission, PipelineError> {
        let tx = Transaction::from_base64(&request.transaction)?;
        let options = request.options.apply_to(&self.config.send);
        let (cluster, client) = self.connect(request.cluster.as_deref())?;

        info!(
            cluster = %cluster,
            simulate_only = options.simulate_only,
            await_confirmation = options.await_confirmation,
            "submitting transaction"
        );
        let result = Submitter::new(client, cluster.name())
            .submit(&tx, &options)
            .await;
        if let Err(PipelineError::Connection { endpoint, .. }) = &result {
            self.clients.evict(endpoint);
        }
        result
    }

    pub async fn status(&self, request: StatusRequest) -> Result<StatusReport, PipelineError> {
        let signature: Signature = request
            .signature
            .trim()
            .parse()
            .map_err(|e| PipelineError::Validation(format!("signature: {e}")))?;
        let (cluster, client) = self.connect(request.cluster.as_deref())?;
        let rpc_err = |e| self.rpc_failure(&cluster, e);

        let statuses = client
            .get_signature_statuses(&[signature], request.search_history)
            .await
            .map_err(rpc_err)?;
        let record = statuses.into_iter().next().flatten();

        let transaction = if request.include_details {
            let commitment = request.commitment.unwrap_or(self.config.send.commitment);
            client
                .get_transaction(&signature, commitment)
                .await
                .map_err(rpc_err)?
        } else {
            None
        };

        let report = status::interpret(signature, record.as_ref(), transaction.as_ref());
        debug!(%signature, status = ?report.status, "status resolved");
        Ok(report)
    }

    /// Invoke a tool by name with a JSON request.
    pub async fn dispatch(&self, tool: &str, input: Value) -> Result<Value, PipelineError> {
        match tool {
            "compile" => to_json(self.compile(parse_request(tool, input)?).await?),
            "sign" => to_json(self.sign(parse_request(tool, input)?).await?),
            "send" => to_json(self.send(parse_request(tool, input)?).await?),
            "status" => to_json(self.status(parse_request(tool, input)?).await?),
            other => Err(PipelineError::Validation(format!(
                "unknown tool {other:?}; expected one of {}",
                TOOL_NAMES.join(", ")
            ))),
        }
    }
}

/// Decode a tool request. Errors for `sign` never quote input values since
/// the request carries key material.
fn parse_request<T: DeserializeOwned>(tool: &str, input: Value) -> Result<T, PipelineError> {
    serde_json::from_value(input).map_err(|e| {
        if tool == "sign" {
            PipelineError::Validation(format!(
                "invalid sign request ({:?} error); field values are not echoed",
                e.classify()
            ))
        } else {
            PipelineError::Validation(format!("invalid {tool} request: {e}"))
        }
    })
}

fn to_json<T: Serialize>(value: T) -> Result<Value, PipelineError> {
    serde_json::to_value(value).map_err(|e| {
        PipelineError::transaction(TransactionErrorCode::Format, format!("encode response: {e}"))
    })
}
