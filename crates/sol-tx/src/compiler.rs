//! Message compilation: instruction descriptors in, canonical message out.
//!
//! Compilation is a pure two-pass transform over an arena of merged account
//! entries. The first pass decides where each account lives (static key
//! table or an address lookup table); the second pass assigns final indices
//! and rewrites every instruction against them. Nothing is patched in place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::address::{Hash, Pubkey};
use crate::error::TxError;
use crate::instruction::{CompiledInstruction, Instruction};
use crate::message::{
    CompiledMessage, MessageAddressTableLookup, MessageHeader, MessageVersion,
};
use crate::system;
use crate::transaction::Transaction;

/// Maximum number of accounts addressable by a u8 index.
const MAX_ACCOUNTS: usize = 256;

/// Durable-nonce anchoring for a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceContext {
    pub nonce_account: Pubkey,
    pub nonce_authority: Pubkey,
    /// Current value stored in the nonce account; becomes the message anchor.
    pub nonce_value: Hash,
}

/// What the message is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    Blockhash(Hash),
    Nonce(NonceContext),
    /// Legacy only: the anchor is filled in later with
    /// [`Transaction::with_anchor`].
    Unset,
}

/// An on-chain address lookup table and its current contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupTableRef {
    pub table_address: Pubkey,
    pub addresses: Vec<Pubkey>,
}

/// Compile instructions into a message and wrap it in an unsigned
/// transaction whose signature slots are all empty.
pub fn compile_transaction(
    fee_payer: &Pubkey,
    instructions: &[Instruction],
    anchor: &Anchor,
    version: MessageVersion,
    lookup_tables: &[LookupTableRef],
) -> Result<Transaction, TxError> {
    let message = compile_message(fee_payer, instructions, anchor, version, lookup_tables)?;
    Ok(Transaction::new_unsigned(message))
}

/// Compile instructions into a [`CompiledMessage`].
///
/// The fee payer is always signer + writable and always `account_keys[0]`.
/// Account flags are merged by OR across every reference, and within each of
/// the four privilege buckets keys keep first-seen order, so compiling the
/// same input twice yields identical bytes.
pub fn compile_message(
    fee_payer: &Pubkey,
    instructions: &[Instruction],
    anchor: &Anchor,
    version: MessageVersion,
    lookup_tables: &[LookupTableRef],
) -> Result<CompiledMessage, TxError> {
    validate_inputs(fee_payer, instructions, anchor, version, lookup_tables)?;

    let (anchor_value, instructions) = apply_anchor(anchor, instructions);

    if instructions.is_empty() {
        warn!(fee_payer = %fee_payer, "compiling a message with no instructions");
    }

    let arena = AccountArena::collect(fee_payer, &instructions);
    let placement = arena.place(lookup_tables);
    let table = placement.index_table(&arena)?;

    let compiled = instructions
        .iter()
        .map(|ix| table.compile_instruction(ix))
        .collect::<Result<Vec<_>, _>>()?;

    let message = CompiledMessage {
        version,
        header: table.header,
        account_keys: table.static_keys,
        anchor: anchor_value,
        instructions: compiled,
        address_table_lookups: table.lookups,
    };
    message.sanitize()?;

    debug!(
        version = ?message.version,
        static_keys = message.account_keys.len(),
        lookup_accounts = message.num_lookup_accounts(),
        instructions = message.instructions.len(),
        required_signatures = message.header.num_required_signatures,
        "compiled message"
    );

    Ok(message)
}

fn validate_inputs(
    fee_payer: &Pubkey,
    instructions: &[Instruction],
    anchor: &Anchor,
    version: MessageVersion,
    lookup_tables: &[LookupTableRef],
) -> Result<(), TxError> {
    if version == MessageVersion::V0 && *anchor == Anchor::Unset {
        return Err(TxError::Validation(
            "v0 messages require a blockhash or nonce anchor".into(),
        ));
    }
    if version == MessageVersion::Legacy && !lookup_tables.is_empty() {
        return Err(TxError::Validation(
            "address lookup tables require a v0 message".into(),
        ));
    }
    for (i, table) in lookup_tables.iter().enumerate() {
        if table.addresses.len() > MAX_ACCOUNTS {
            return Err(TxError::Validation(format!(
                "lookup_tables[{i}]: {} addresses exceed the {MAX_ACCOUNTS} indexable entries",
                table.addresses.len()
            )));
        }
    }
    for (i, ix) in instructions.iter().enumerate() {
        if ix.program_id == *fee_payer {
            return Err(TxError::Validation(format!(
                "instructions[{i}]: the fee payer cannot be invoked as a program"
            )));
        }
    }
    Ok(())
}

/// Resolve the anchor value and, for durable nonces, prepend the
/// `AdvanceNonceAccount` instruction unless the caller already placed it first.
fn apply_anchor(anchor: &Anchor, instructions: &[Instruction]) -> (Option<Hash>, Vec<Instruction>) {
    match anchor {
        Anchor::Blockhash(hash) => (Some(*hash), instructions.to_vec()),
        Anchor::Unset => (None, instructions.to_vec()),
        Anchor::Nonce(nonce) => {
            let mut out = Vec::with_capacity(instructions.len() + 1);
            let already_first = instructions.first().is_some_and(|ix| {
                system::is_advance_nonce(&ix.program_id, &ix.data)
                    && ix.accounts.first().map(|meta| meta.pubkey) == Some(nonce.nonce_account)
            });
            if !already_first {
                out.push(system::advance_nonce_account(
                    &nonce.nonce_account,
                    &nonce.nonce_authority,
                ));
            }
            out.extend_from_slice(instructions);
            (Some(nonce.nonce_value), out)
        }
    }
}

/// One merged account reference.
#[derive(Debug, Clone)]
struct AccountEntry {
    key: Pubkey,
    is_signer: bool,
    is_writable: bool,
    /// Used as a program id by some instruction.
    is_invoked: bool,
}

impl AccountEntry {
    /// Canonical bucket: writable signers, readonly signers, writable
    /// non-signers, readonly non-signers.
    fn bucket(&self) -> u8 {
        match (self.is_signer, self.is_writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        }
    }
}

/// Merged accounts in first-seen order.
struct AccountArena {
    entries: Vec<AccountEntry>,
}

impl AccountArena {
    fn collect(fee_payer: &Pubkey, instructions: &[Instruction]) -> Self {
        let mut entries: Vec<AccountEntry> = Vec::new();
        let mut positions: HashMap<Pubkey, usize> = HashMap::new();

        let mut upsert = |key: Pubkey, signer: bool, writable: bool, invoked: bool| {
            if let Some(&pos) = positions.get(&key) {
                let entry = &mut entries[pos];
                entry.is_signer |= signer;
                entry.is_writable |= writable;
                entry.is_invoked |= invoked;
            } else {
                positions.insert(key, entries.len());
                entries.push(AccountEntry {
                    key,
                    is_signer: signer,
                    is_writable: writable,
                    is_invoked: invoked,
                });
            }
        };

        upsert(*fee_payer, true, true, false);

        for ix in instructions {
            for meta in &ix.accounts {
                upsert(meta.pubkey, meta.is_signer, meta.is_writable, false);
            }
            upsert(ix.program_id, false, false, true);
        }

        Self { entries }
    }

    /// First pass: decide the location of every entry.
    ///
    /// Signers and invoked programs always stay static. Any other account
    /// found in a lookup table is loaded from the first table containing it.
    fn place(&self, lookup_tables: &[LookupTableRef]) -> Placement {
        let mut table_positions: HashMap<Pubkey, (usize, u8)> = HashMap::new();
        for (t, table) in lookup_tables.iter().enumerate() {
            for (offset, key) in table.addresses.iter().enumerate() {
                // Offsets are < 256 after input validation.
                table_positions.entry(*key).or_insert((t, offset as u8));
            }
        }

        let locations = self
            .entries
            .iter()
            .map(|entry| {
                if entry.is_signer || entry.is_invoked {
                    return Location::Static;
                }
                match table_positions.get(&entry.key) {
                    Some(&(table, offset)) => Location::Table {
                        table,
                        table_address: lookup_tables[table].table_address,
                        offset,
                    },
                    None => Location::Static,
                }
            })
            .collect();

        Placement {
            locations,
            num_tables: lookup_tables.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Static,
    Table {
        table: usize,
        table_address: Pubkey,
        offset: u8,
    },
}

/// Output of the first pass, parallel to the arena entries.
struct Placement {
    locations: Vec<Location>,
    num_tables: usize,
}

impl Placement {
    /// Second pass: lay out static keys and lookups, then assign indices.
    fn index_table(&self, arena: &AccountArena) -> Result<IndexTable, TxError> {
        let entries = &arena.entries;

        let mut static_order: Vec<usize> = (0..entries.len())
            .filter(|&i| self.locations[i] == Location::Static)
            .collect();
        // Stable sort keeps first-seen order within each bucket; the fee payer
        // is first-seen and writable+signer, so it stays at index 0.
        static_order.sort_by_key(|&i| entries[i].bucket());

        let mut writable: Vec<Vec<(usize, u8)>> = vec![Vec::new(); self.num_tables];
        let mut readonly: Vec<Vec<(usize, u8)>> = vec![Vec::new(); self.num_tables];
        let mut table_addresses: Vec<Option<Pubkey>> = vec![None; self.num_tables];
        for (i, location) in self.locations.iter().enumerate() {
            if let Location::Table {
                table,
                table_address,
                offset,
            } = *location
            {
                table_addresses[table] = Some(table_address);
                if entries[i].is_writable {
                    writable[table].push((i, offset));
                } else {
                    readonly[table].push((i, offset));
                }
            }
        }

        let static_count = static_order.len();
        let loaded_count: usize = writable.iter().chain(readonly.iter()).map(Vec::len).sum();
        if static_count + loaded_count > MAX_ACCOUNTS {
            return Err(TxError::Validation(format!(
                "transaction references {} accounts; at most {MAX_ACCOUNTS} are addressable",
                static_count + loaded_count
            )));
        }

        let mut index_of: HashMap<Pubkey, u8> = HashMap::with_capacity(entries.len());
        for (pos, &i) in static_order.iter().enumerate() {
            index_of.insert(entries[i].key, pos as u8);
        }

        // Tables that resolve nothing are left out of the message.
        let used: Vec<usize> = (0..self.num_tables)
            .filter(|&t| !writable[t].is_empty() || !readonly[t].is_empty())
            .collect();

        let mut next = static_count;
        for &t in &used {
            for &(i, _) in &writable[t] {
                index_of.insert(entries[i].key, next as u8);
                next += 1;
            }
        }
        for &t in &used {
            for &(i, _) in &readonly[t] {
                index_of.insert(entries[i].key, next as u8);
                next += 1;
            }
        }

        let mut lookups = Vec::with_capacity(used.len());
        for &t in &used {
            let account_key = table_addresses[t].ok_or_else(|| {
                TxError::Validation(format!("lookup_tables[{t}]: missing table address"))
            })?;
            lookups.push(MessageAddressTableLookup {
                account_key,
                writable_indexes: writable[t].iter().map(|&(_, offset)| offset).collect(),
                readonly_indexes: readonly[t].iter().map(|&(_, offset)| offset).collect(),
            });
        }

        let count = |bucket: u8| {
            static_order
                .iter()
                .filter(|&&i| entries[i].bucket() == bucket)
                .count()
        };
        let num_signers = count(0) + count(1);
        let header = MessageHeader {
            num_required_signatures: u8::try_from(num_signers).map_err(|_| {
                TxError::Validation(format!("{num_signers} signers exceed the limit of 255"))
            })?,
            num_readonly_signed_accounts: count(1) as u8,
            num_readonly_unsigned_accounts: count(3) as u8,
        };

        Ok(IndexTable {
            header,
            static_keys: static_order.iter().map(|&i| entries[i].key).collect(),
            lookups,
            index_of,
        })
    }
}

/// Final account layout plus the key-to-index map used for re-indexing.
struct IndexTable {
    header: MessageHeader,
    static_keys: Vec<Pubkey>,
    lookups: Vec<MessageAddressTableLookup>,
    index_of: HashMap<Pubkey, u8>,
}

impl IndexTable {
    fn index(&self, key: &Pubkey) -> Result<u8, TxError> {
        self.index_of.get(key).copied().ok_or_else(|| {
            TxError::Validation(format!("account {key} missing from the compiled key table"))
        })
    }

    fn compile_instruction(&self, ix: &Instruction) -> Result<CompiledInstruction, TxError> {
        let account_indices = ix
            .accounts
            .iter()
            .map(|meta| self.index(&meta.pubkey))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledInstruction {
            program_id_index: self.index(&ix.program_id)?,
            account_indices,
            data: ix.data.clone(),
        })
    }
}
