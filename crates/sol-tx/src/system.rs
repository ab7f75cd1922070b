//! System Program instructions used by the pipeline.

use crate::address::Pubkey;
use crate::error::TxError;
use crate::instruction::{AccountMeta, Instruction};

/// The Solana System Program: 32 zero bytes.
/// Base58: `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new([0u8; 32]);

/// `SysvarRecentB1ockHashes11111111111111111111`, read by `AdvanceNonceAccount`.
pub const RECENT_BLOCKHASHES_SYSVAR_ID: Pubkey = Pubkey::new([
    0x06, 0xa7, 0xd5, 0x17, 0x19, 0x2c, 0x56, 0x8e, 0xe0, 0x8a, 0x84, 0x5f, 0x73, 0xd2, 0x97,
    0x88, 0xcf, 0x03, 0x5c, 0x31, 0x45, 0xb2, 0x1a, 0xb3, 0x44, 0xd8, 0x06, 0x2e, 0xa9, 0x40,
    0x00, 0x00,
]);

// System Program instruction indices (little-endian u32 on the wire).
const TRANSFER_IX_INDEX: u32 = 2;
const ADVANCE_NONCE_IX_INDEX: u32 = 4;

/// Build a System Program `Transfer` of `lamports` from `from` to `to`.
pub fn transfer(from: &Pubkey, to: &Pubkey, lamports: u64) -> Result<Instruction, TxError> {
    if lamports == 0 {
        return Err(TxError::Validation("lamports must be > 0".into()));
    }

    // u32 LE instruction index (2 = Transfer) + u64 LE lamports.
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&TRANSFER_IX_INDEX.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    Ok(Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::writable(*from, true),
            AccountMeta::writable(*to, false),
        ],
        data,
    })
}

/// Build the `AdvanceNonceAccount` instruction that consumes a durable nonce.
///
/// Accounts: nonce account (writable), RecentBlockhashes sysvar, nonce
/// authority (signer).
pub fn advance_nonce_account(nonce_account: &Pubkey, authority: &Pubkey) -> Instruction {
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::writable(*nonce_account, false),
            AccountMeta::readonly(RECENT_BLOCKHASHES_SYSVAR_ID, false),
            AccountMeta::readonly(*authority, true),
        ],
        data: ADVANCE_NONCE_IX_INDEX.to_le_bytes().to_vec(),
    }
}

/// Whether a program id and data pair encode `AdvanceNonceAccount`.
pub fn is_advance_nonce(program_id: &Pubkey, data: &[u8]) -> bool {
    *program_id == SYSTEM_PROGRAM_ID && data == ADVANCE_NONCE_IX_INDEX.to_le_bytes()
}
