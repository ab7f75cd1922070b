//! JSON request and response shapes for the four pipeline tools, and their
//! conversion into `sol-tx` values.
//!
//! Every address is resolved with the path of the field it came from, so a
//! bad account in a raw instruction is reported as
//! `instructions[2].accounts[1].pubkey: ...`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sol_rpc::Commitment;
use sol_tx::spl_token::{self, TOKEN_PROGRAM_ID};
use sol_tx::{
    compute_budget, resolve_address, system, AccountMeta, Hash, Instruction, KeyInput,
    LookupTableRef, MessageVersion, NonceContext, Pubkey, SigningStatus,
};

use crate::error::PipelineError;
use crate::submit::SendOptions;

/// Encoding of raw instruction data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataEncoding {
    #[default]
    Base64,
    Base58,
    Hex,
}

impl DataEncoding {
    fn decode(self, data: &str) -> Result<Vec<u8>, String> {
        match self {
            DataEncoding::Base64 => BASE64.decode(data).map_err(|e| format!("invalid base64: {e}")),
            DataEncoding::Base58 => bs58::decode(data)
                .into_vec()
                .map_err(|e| format!("invalid base58: {e}")),
            DataEncoding::Hex => hex::decode(data).map_err(|e| format!("invalid hex: {e}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInput {
    pub pubkey: String,
    #[serde(default)]
    pub is_signer: bool,
    #[serde(default)]
    pub is_writable: bool,
}

/// One entry of `compile.instructions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InstructionInput {
    Raw {
        program_id: String,
        #[serde(default)]
        accounts: Vec<AccountInput>,
        #[serde(default)]
        data: String,
        #[serde(default)]
        encoding: DataEncoding,
    },
    SystemTransfer {
        from: String,
        to: String,
        lamports: u64,
    },
    /// Wallet-to-wallet token transfer between associated token accounts.
    SplTransfer {
        owner: String,
        recipient: String,
        mint: String,
        amount: u64,
        #[serde(default)]
        decimals: Option<u8>,
        #[serde(default)]
        token_program: Option<String>,
        /// Prepend an idempotent ATA creation for the recipient, funded by
        /// the fee payer.
        #[serde(default)]
        create_recipient_account: bool,
    },
    SplMintTo {
        mint: String,
        mint_authority: String,
        /// Wallet whose associated token account receives the tokens.
        recipient: String,
        amount: u64,
        #[serde(default)]
        decimals: Option<u8>,
        #[serde(default)]
        token_program: Option<String>,
        #[serde(default)]
        create_recipient_account: bool,
    },
    SetComputeUnitLimit {
        units: u32,
    },
    SetComputeUnitPrice {
        micro_lamports: u64,
    },
}

impl InstructionInput {
    /// Expand into instructions. `path` prefixes field names in errors;
    /// `fee_payer` funds any account creation.
    pub fn to_instructions(
        &self,
        path: &str,
        fee_payer: &Pubkey,
    ) -> Result<Vec<Instruction>, PipelineError> {
        let field = |name: &str| format!("{path}.{name}");
        let at = |e: sol_tx::TxError| PipelineError::Validation(format!("{path}: {e}"));

        match self {
            InstructionInput::Raw {
                program_id,
                accounts,
                data,
                encoding,
            } => {
                let program_id = resolve_address(&field("programId"), program_id)?;
                let accounts = accounts
                    .iter()
                    .enumerate()
                    .map(|(i, account)| -> Result<AccountMeta, PipelineError> {
                        let pubkey_field = format!("{path}.accounts[{i}].pubkey");
                        Ok(AccountMeta {
                            pubkey: resolve_address(&pubkey_field, &account.pubkey)?,
                            is_signer: account.is_signer,
                            is_writable: account.is_writable,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let data = encoding
                    .decode(data.trim())
                    .map_err(|e| PipelineError::Validation(format!("{}: {e}", field("data"))))?;
                Ok(vec![Instruction {
                    program_id,
                    accounts,
                    data,
                }])
            }
            InstructionInput::SystemTransfer { from, to, lamports } => {
                let from = resolve_address(&field("from"), from)?;
                let to = resolve_address(&field("to"), to)?;
                Ok(vec![system::transfer(&from, &to, *lamports).map_err(at)?])
            }
            InstructionInput::SplTransfer {
                owner,
                recipient,
                mint,
                amount,
                decimals,
                token_program,
                create_recipient_account,
            } => {
                let owner = resolve_address(&field("owner"), owner)?;
                let recipient = resolve_address(&field("recipient"), recipient)?;
                let mint = resolve_address(&field("mint"), mint)?;
                let token_program =
                    token_program_or_default(&field("tokenProgram"), token_program.as_deref())?;

                let source =
                    spl_token::derive_associated_token_address(&owner, &mint, &token_program)
                        .map_err(at)?;
                let destination =
                    spl_token::derive_associated_token_address(&recipient, &mint, &token_program)
                        .map_err(at)?;

                let mut out = Vec::with_capacity(2);
                if *create_recipient_account {
                    out.push(
                        spl_token::create_associated_token_account_idempotent(
                            fee_payer,
                            &recipient,
                            &mint,
                            &token_program,
                        )
                        .map_err(at)?,
                    );
                }
                let transfer = match decimals {
                    Some(decimals) => spl_token::transfer_checked(
                        &token_program,
                        &source,
                        &mint,
                        &destination,
                        &owner,
                        *amount,
                        *decimals,
                    ),
                    None => {
                        spl_token::transfer(&token_program, &source, &destination, &owner, *amount)
                    }
                };
                out.push(transfer.map_err(at)?);
                Ok(out)
            }
            InstructionInput::SplMintTo {
                mint,
                mint_authority,
                recipient,
                amount,
                decimals,
                token_program,
                create_recipient_account,
            } => {
                let mint = resolve_address(&field("mint"), mint)?;
                let authority = resolve_address(&field("mintAuthority"), mint_authority)?;
                let recipient = resolve_address(&field("recipient"), recipient)?;
                let token_program =
                    token_program_or_default(&field("tokenProgram"), token_program.as_deref())?;
                let destination =
                    spl_token::derive_associated_token_address(&recipient, &mint, &token_program)
                        .map_err(at)?;

                let mut out = Vec::with_capacity(2);
                if *create_recipient_account {
                    out.push(
                        spl_token::create_associated_token_account_idempotent(
                            fee_payer,
                            &recipient,
                            &mint,
                            &token_program,
                        )
                        .map_err(at)?,
                    );
                }
                out.push(
                    spl_token::mint_to(
                        &token_program,
                        &mint,
                        &destination,
                        &authority,
                        *amount,
                        *decimals,
                    )
                    .map_err(at)?,
                );
                Ok(out)
            }
            InstructionInput::SetComputeUnitLimit { units } => {
                Ok(vec![compute_budget::set_compute_unit_limit(*units)])
            }
            InstructionInput::SetComputeUnitPrice { micro_lamports } => {
                Ok(vec![compute_budget::set_compute_unit_price(*micro_lamports)])
            }
        }
    }
}

fn token_program_or_default(field: &str, value: Option<&str>) -> Result<Pubkey, PipelineError> {
    match value {
        Some(value) => Ok(resolve_address(field, value)?),
        None => Ok(TOKEN_PROGRAM_ID),
    }
}

/// What the compiled message is anchored to.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AnchorInput {
    Blockhash {
        value: String,
    },
    Nonce {
        nonce_account: String,
        nonce_authority: String,
        nonce_value: String,
    },
    /// Fetch the latest blockhash from the cluster.
    Latest {
        #[serde(default)]
        commitment: Option<Commitment>,
    },
    /// Legacy only; set the anchor before signing.
    #[default]
    None,
}

impl AnchorInput {
    pub fn resolve_nonce(
        nonce_account: &str,
        nonce_authority: &str,
        nonce_value: &str,
    ) -> Result<NonceContext, PipelineError> {
        Ok(NonceContext {
            nonce_account: resolve_address("anchor.nonceAccount", nonce_account)?,
            nonce_authority: resolve_address("anchor.nonceAuthority", nonce_authority)?,
            nonce_value: parse_hash("anchor.nonceValue", nonce_value)?,
        })
    }
}

pub fn parse_hash(field: &str, value: &str) -> Result<Hash, PipelineError> {
    value
        .trim()
        .parse()
        .map_err(|e| PipelineError::Validation(format!("{field}: {e}")))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupTableInput {
    pub address: String,
    pub addresses: Vec<String>,
}

impl LookupTableInput {
    pub fn resolve(&self, path: &str) -> Result<LookupTableRef, PipelineError> {
        let table_address = resolve_address(&format!("{path}.address"), &self.address)?;
        let addresses = self
            .addresses
            .iter()
            .enumerate()
            .map(|(i, a)| resolve_address(&format!("{path}.addresses[{i}]"), a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LookupTableRef {
            table_address,
            addresses,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub fee_payer: String,
    pub instructions: Vec<InstructionInput>,
    #[serde(default)]
    pub anchor: AnchorInput,
    #[serde(default)]
    pub version: MessageVersion,
    #[serde(default)]
    pub lookup_tables: Vec<LookupTableInput>,
    /// Cluster for `latest` anchors; defaults to the configured one.
    #[serde(default)]
    pub cluster: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    /// Base64 message bytes, the exact bytes each signer signs.
    pub serialized_message: String,
    /// Base64 transaction with every signature slot empty.
    pub serialized_transaction: String,
    pub version: MessageVersion,
    pub required_signers: Vec<Pubkey>,
    pub static_account_count: usize,
    pub lookup_account_count: usize,
    pub instruction_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Hash>,
}

/// `sign` accepts either a transaction or a bare message (both Base64).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub signing_keys: Vec<KeyInput>,
    /// Anchor for a legacy message compiled without one: `blockhash` or
    /// `latest`. Rejected when the message is already anchored.
    #[serde(default)]
    pub anchor: Option<AnchorInput>,
    /// Cluster for a `latest` anchor.
    #[serde(default)]
    pub cluster: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    pub serialized_transaction: String,
    pub signing_status: SigningStatus,
    /// Fee payer signature once present; this is the transaction id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<sol_tx::Signature>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub transaction: String,
    /// Fields given here replace the configured defaults one by one.
    #[serde(default)]
    pub options: SendOverrides,
    #[serde(default)]
    pub cluster: Option<String>,
}

/// Per-request changes to the configured `[send]` options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendOverrides {
    pub skip_preflight: Option<bool>,
    pub commitment: Option<Commitment>,
    pub preflight_commitment: Option<Commitment>,
    pub max_retries: Option<u32>,
    pub await_confirmation: Option<bool>,
    pub confirmation_timeout_ms: Option<u64>,
    pub simulate_only: Option<bool>,
}

impl SendOverrides {
    pub fn apply_to(&self, base: &SendOptions) -> SendOptions {
        SendOptions {
            skip_preflight: self.skip_preflight.unwrap_or(base.skip_preflight),
            commitment: self.commitment.unwrap_or(base.commitment),
            preflight_commitment: self.preflight_commitment.or(base.preflight_commitment),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            await_confirmation: self.await_confirmation.unwrap_or(base.await_confirmation),
            confirmation_timeout_ms: self
                .confirmation_timeout_ms
                .unwrap_or(base.confirmation_timeout_ms),
            simulate_only: self.simulate_only.unwrap_or(base.simulate_only),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub signature: String,
    /// Also fetch full transaction metadata.
    #[serde(default)]
    pub include_details: bool,
    #[serde(default = "default_true")]
    pub search_history: bool,
    #[serde(default)]
    pub commitment: Option<Commitment>,
    #[serde(default)]
    pub cluster: Option<String>,
}

fn default_true() -> bool {
    true
}
