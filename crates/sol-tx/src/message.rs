//! Compiled transaction messages and their wire layout.
//!
//! ```text
//! Legacy message:
//!   num_required_sigs     u8
//!   num_readonly_signed   u8
//!   num_readonly_unsigned u8
//!   num_accounts          compact-u16
//!   account_keys          32 bytes * num_accounts
//!   anchor                32 bytes (blockhash or durable nonce)
//!   num_instructions      compact-u16
//!   instructions[]
//!
//! Instruction:
//!   program_id_index      u8
//!   num_accounts          compact-u16
//!   account_indices       u8 * num_accounts
//!   data_len              compact-u16
//!   data                  u8 * data_len
//!
//! v0 message:
//!   0x80                  version prefix (high bit set, version 0)
//!   <legacy layout>
//!   num_lookups           compact-u16
//!   lookups[]:
//!     table_key           32 bytes
//!     writable_indexes    compact-u16 length + u8 each
//!     readonly_indexes    compact-u16 length + u8 each
//! ```
//!
//! Account indices in a v0 message address the static keys first, then every
//! table's writable entries (in lookup order), then every table's readonly
//! entries.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::address::{Hash, Pubkey};
use crate::error::TxError;
use crate::instruction::CompiledInstruction;
use crate::wire::{put_len, ByteReader};

const VERSION_PREFIX: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed_accounts: u8,
    pub num_readonly_unsigned_accounts: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageVersion {
    #[default]
    Legacy,
    V0,
}

/// Accounts loaded from one on-chain address lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAddressTableLookup {
    pub account_key: Pubkey,
    pub writable_indexes: Vec<u8>,
    pub readonly_indexes: Vec<u8>,
}

/// An immutable, compiled message. Any change requires recompilation, which
/// invalidates signatures made over the previous bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMessage {
    pub version: MessageVersion,
    pub header: MessageHeader,
    /// Static keys in canonical order: writable signers (fee payer first),
    /// readonly signers, writable non-signers, readonly non-signers.
    pub account_keys: Vec<Pubkey>,
    /// `None` when a legacy message was compiled without an anchor; encoded
    /// as 32 zero bytes.
    pub anchor: Option<Hash>,
    pub instructions: Vec<CompiledInstruction>,
    /// Always empty for legacy messages.
    pub address_table_lookups: Vec<MessageAddressTableLookup>,
}

impl CompiledMessage {
    /// The identities whose signatures this message requires, in slot order.
    pub fn required_signers(&self) -> &[Pubkey] {
        let n = (self.header.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    /// Number of accounts loaded through lookup tables.
    pub fn num_lookup_accounts(&self) -> usize {
        self.address_table_lookups
            .iter()
            .map(|l| l.writable_indexes.len() + l.readonly_indexes.len())
            .sum()
    }

    pub fn total_account_count(&self) -> usize {
        self.account_keys.len() + self.num_lookup_accounts()
    }

    /// Program invoked by the instruction at `ix_index`. Programs are always
    /// static keys.
    pub fn program_id(&self, ix_index: usize) -> Option<&Pubkey> {
        let ix = self.instructions.get(ix_index)?;
        self.account_keys.get(ix.program_id_index as usize)
    }

    /// Serialize the message (the bytes that get signed).
    pub fn serialize(&self) -> Result<Vec<u8>, TxError> {
        let mut buf = Vec::with_capacity(256);

        if self.version == MessageVersion::V0 {
            buf.push(VERSION_PREFIX);
        }

        buf.push(self.header.num_required_signatures);
        buf.push(self.header.num_readonly_signed_accounts);
        buf.push(self.header.num_readonly_unsigned_accounts);

        put_len(&mut buf, self.account_keys.len(), "account keys")?;
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }

        buf.extend_from_slice(self.anchor.unwrap_or(Hash::ZERO).as_bytes());

        put_len(&mut buf, self.instructions.len(), "instructions")?;
        for ix in &self.instructions {
            buf.push(ix.program_id_index);
            put_len(&mut buf, ix.account_indices.len(), "instruction accounts")?;
            buf.extend_from_slice(&ix.account_indices);
            put_len(&mut buf, ix.data.len(), "instruction data bytes")?;
            buf.extend_from_slice(&ix.data);
        }

        if self.version == MessageVersion::V0 {
            put_len(&mut buf, self.address_table_lookups.len(), "table lookups")?;
            for lookup in &self.address_table_lookups {
                buf.extend_from_slice(lookup.account_key.as_bytes());
                put_len(&mut buf, lookup.writable_indexes.len(), "lookup indexes")?;
                buf.extend_from_slice(&lookup.writable_indexes);
                put_len(&mut buf, lookup.readonly_indexes.len(), "lookup indexes")?;
                buf.extend_from_slice(&lookup.readonly_indexes);
            }
        } else if !self.address_table_lookups.is_empty() {
            return Err(TxError::Format(
                "legacy messages cannot carry address table lookups".into(),
            ));
        }

        Ok(buf)
    }

    /// Parse a standalone serialized message.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TxError> {
        let mut reader = ByteReader::new(bytes);
        let message = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(message)
    }

    pub(crate) fn read(reader: &mut ByteReader<'_>) -> Result<Self, TxError> {
        let first = reader
            .peek_u8()
            .ok_or_else(|| TxError::Serialization("empty message".into()))?;

        let version = if first & VERSION_PREFIX != 0 {
            reader.read_u8()?;
            match first & !VERSION_PREFIX {
                0 => MessageVersion::V0,
                v => {
                    return Err(TxError::Format(format!(
                        "unsupported message version {v}"
                    )))
                }
            }
        } else {
            MessageVersion::Legacy
        };

        let header = MessageHeader {
            num_required_signatures: reader.read_u8()?,
            num_readonly_signed_accounts: reader.read_u8()?,
            num_readonly_unsigned_accounts: reader.read_u8()?,
        };

        let num_keys = reader.read_len()?;
        let mut account_keys = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            account_keys.push(Pubkey::new(reader.read_array()?));
        }

        let anchor = Hash::new(reader.read_array()?);
        let anchor = (!anchor.is_zero()).then_some(anchor);

        let num_ixs = reader.read_len()?;
        let mut instructions = Vec::with_capacity(num_ixs);
        for _ in 0..num_ixs {
            let program_id_index = reader.read_u8()?;
            let n = reader.read_len()?;
            let account_indices = reader.read_bytes(n)?.to_vec();
            let n = reader.read_len()?;
            let data = reader.read_bytes(n)?.to_vec();
            instructions.push(CompiledInstruction {
                program_id_index,
                account_indices,
                data,
            });
        }

        let mut address_table_lookups = Vec::new();
        if version == MessageVersion::V0 {
            let num_lookups = reader.read_len()?;
            for _ in 0..num_lookups {
                let account_key = Pubkey::new(reader.read_array()?);
                let n = reader.read_len()?;
                let writable_indexes = reader.read_bytes(n)?.to_vec();
                let n = reader.read_len()?;
                let readonly_indexes = reader.read_bytes(n)?.to_vec();
                address_table_lookups.push(MessageAddressTableLookup {
                    account_key,
                    writable_indexes,
                    readonly_indexes,
                });
            }
        }

        let message = Self {
            version,
            header,
            account_keys,
            anchor,
            instructions,
            address_table_lookups,
        };
        message.sanitize()?;
        Ok(message)
    }

    /// Structural checks shared by the compiler output and decoded messages.
    pub fn sanitize(&self) -> Result<(), TxError> {
        let num_keys = self.account_keys.len();
        let num_signers = self.header.num_required_signatures as usize;

        if num_signers == 0 {
            return Err(TxError::Format("message requires no signatures".into()));
        }
        if num_signers > num_keys {
            return Err(TxError::Format(format!(
                "{num_signers} required signatures but only {num_keys} account keys"
            )));
        }
        if self.header.num_readonly_signed_accounts as usize >= num_signers {
            return Err(TxError::Format(
                "fee payer must be a writable signer".into(),
            ));
        }
        if self.header.num_readonly_unsigned_accounts as usize > num_keys - num_signers {
            return Err(TxError::Format(
                "readonly unsigned count exceeds non-signer keys".into(),
            ));
        }

        let mut seen = HashSet::with_capacity(num_keys);
        if let Some(dup) = self.account_keys.iter().find(|key| !seen.insert(**key)) {
            return Err(TxError::Format(format!("account key {dup} is listed more than once")));
        }
        let mut tables = HashSet::with_capacity(self.address_table_lookups.len());
        for lookup in &self.address_table_lookups {
            if !tables.insert(lookup.account_key) {
                return Err(TxError::Format(format!(
                    "lookup table {} is listed more than once",
                    lookup.account_key
                )));
            }
            let mut offsets = HashSet::new();
            let all = lookup.writable_indexes.iter().chain(&lookup.readonly_indexes);
            if let Some(dup) = all.copied().find(|idx| !offsets.insert(*idx)) {
                return Err(TxError::Format(format!(
                    "lookup table {}: entry {dup} is loaded more than once",
                    lookup.account_key
                )));
            }
        }

        let total = self.total_account_count();
        if total > 256 {
            return Err(TxError::Format(format!(
                "{total} accounts exceed the 256 addressable by u8 indices"
            )));
        }

        for (i, ix) in self.instructions.iter().enumerate() {
            let program = ix.program_id_index as usize;
            if program == 0 || program >= num_keys {
                return Err(TxError::Format(format!(
                    "instruction {i}: program index {program} is not a static non-payer key"
                )));
            }
            if let Some(bad) = ix.account_indices.iter().find(|idx| **idx as usize >= total) {
                return Err(TxError::Format(format!(
                    "instruction {i}: account index {bad} out of range ({total} accounts)"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode_compact_u16;

    fn sample(version: MessageVersion) -> CompiledMessage {
        let lookups = if version == MessageVersion::V0 {
            vec![MessageAddressTableLookup {
                account_key: Pubkey::new([9; 32]),
                writable_indexes: vec![0, 2],
                readonly_indexes: vec![1],
            }]
        } else {
            Vec::new()
        };
        CompiledMessage {
            version,
            header: MessageHeader {
                num_required_signatures: 1,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 1,
            },
            account_keys: vec![Pubkey::new([1; 32]), Pubkey::new([2; 32]), Pubkey::new([0; 32])],
            anchor: Some(Hash::new([0xCC; 32])),
            instructions: vec![CompiledInstruction {
                program_id_index: 2,
                account_indices: vec![0, 1],
                data: vec![2, 0, 0, 0],
            }],
            address_table_lookups: lookups,
        }
    }

    #[test]
    fn legacy_layout_starts_with_header() {
        let msg = sample(MessageVersion::Legacy);
        let bytes = msg.serialize().unwrap();
        assert_eq!(&bytes[..3], &[1, 0, 1]);

        // Anchor sits after header(3) + compact-u16(num_accounts) + 32*num_accounts.
        let offset = 3 + encode_compact_u16(3).len() + 32 * 3;
        assert_eq!(&bytes[offset..offset + 32], &[0xCC; 32]);
    }

    #[test]
    fn v0_layout_has_prefix_and_lookups() {
        let msg = sample(MessageVersion::V0);
        let bytes = msg.serialize().unwrap();
        assert_eq!(bytes[0], 0x80);
        assert_eq!(&bytes[1..4], &[1, 0, 1]);
        // Tail: 1 lookup, 32-byte key, [2: 0,2], [1: 1]
        let tail = &bytes[bytes.len() - 38..];
        assert_eq!(tail[0], 1);
        assert_eq!(&tail[1..33], &[9; 32]);
        assert_eq!(&tail[33..], &[2, 0, 2, 1, 1]);
    }

    #[test]
    fn decode_restores_both_versions() {
        for version in [MessageVersion::Legacy, MessageVersion::V0] {
            let msg = sample(version);
            let decoded = CompiledMessage::deserialize(&msg.serialize().unwrap()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn unset_anchor_is_zero_on_the_wire() {
        let mut msg = sample(MessageVersion::Legacy);
        msg.anchor = None;
        let bytes = msg.serialize().unwrap();
        let decoded = CompiledMessage::deserialize(&bytes).unwrap();
        assert_eq!(decoded.anchor, None);
    }

    #[test]
    fn unknown_version_rejected() {
        let mut bytes = sample(MessageVersion::V0).serialize().unwrap();
        bytes[0] = 0x81;
        let err = CompiledMessage::deserialize(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported message version 1"));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = sample(MessageVersion::Legacy).serialize().unwrap();
        bytes.push(0);
        assert!(CompiledMessage::deserialize(&bytes).is_err());
    }

    #[test]
    fn out_of_range_index_rejected() {
        let mut msg = sample(MessageVersion::Legacy);
        msg.instructions[0].account_indices = vec![0, 7];
        let bytes = msg.serialize().unwrap();
        let err = CompiledMessage::deserialize(&bytes).unwrap_err();
        assert!(err.to_string().contains("account index 7"));
    }

    #[test]
    fn lookup_indices_extend_the_range() {
        let mut msg = sample(MessageVersion::V0);
        // 3 static + 3 loaded = 6 addressable accounts.
        msg.instructions[0].account_indices = vec![0, 5];
        assert!(msg.sanitize().is_ok());
        msg.instructions[0].account_indices = vec![0, 6];
        assert!(msg.sanitize().is_err());
    }

    #[test]
    fn required_signers_follow_the_header() {
        let msg = CompiledMessage {
            header: MessageHeader {
                num_required_signatures: 2,
                num_readonly_signed_accounts: 1,
                num_readonly_unsigned_accounts: 1,
            },
            account_keys: (1..=4).map(|b| Pubkey::new([b; 32])).collect(),
            ..sample(MessageVersion::Legacy)
        };
        assert_eq!(msg.required_signers(), &msg.account_keys[..2]);
    }

    #[test]
    fn duplicate_signer_is_rejected_on_restore() {
        let a = Pubkey::new([1; 32]);
        let msg = CompiledMessage {
            header: MessageHeader {
                num_required_signatures: 2,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 1,
            },
            account_keys: vec![a, a, Pubkey::new([0; 32])],
            ..sample(MessageVersion::Legacy)
        };
        let bytes = msg.serialize().unwrap();
        let err = CompiledMessage::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, TxError::Format(_)));
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn lookup_entry_loaded_twice_is_rejected() {
        let mut msg = sample(MessageVersion::V0);
        msg.address_table_lookups[0].readonly_indexes = vec![2];
        assert!(msg.sanitize().is_err());

        let mut msg = sample(MessageVersion::V0);
        let table = msg.address_table_lookups[0].clone();
        msg.address_table_lookups.push(table);
        assert!(msg.sanitize().is_err());
    }

    #[test]
    fn legacy_with_lookups_cannot_serialize() {
        let mut msg = sample(MessageVersion::Legacy);
        msg.address_table_lookups = sample(MessageVersion::V0).address_table_lookups;
        assert!(msg.serialize().is_err());
    }
}
