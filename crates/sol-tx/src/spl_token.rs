//! SPL Token instructions and associated token account derivation.
//!
//! Implemented without the `spl-token` crate; instruction layouts are one tag
//! byte followed by little-endian arguments.

use sha2::{Digest, Sha256};

use crate::address::Pubkey;
use crate::error::TxError;
use crate::instruction::{AccountMeta, Instruction};
use crate::system::SYSTEM_PROGRAM_ID;

/// SPL Token Program ID: `TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA`
pub const TOKEN_PROGRAM_ID: Pubkey = Pubkey::new([
    0x06, 0xdd, 0xf6, 0xe1, 0xd7, 0x65, 0xa1, 0x93, 0xd9, 0xcb, 0xe1, 0x46, 0xce, 0xeb, 0x79,
    0xac, 0x1c, 0xb4, 0x85, 0xed, 0x5f, 0x5b, 0x37, 0x91, 0x3a, 0x8c, 0xf5, 0x85, 0x7e, 0xff,
    0x00, 0xa9,
]);

/// Associated Token Account Program ID: `ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL`
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = Pubkey::new([
    0x8c, 0x97, 0x25, 0x8f, 0x4e, 0x24, 0x89, 0xf1, 0xbb, 0x3d, 0x10, 0x29, 0x14, 0x8e, 0x0d,
    0x83, 0x0b, 0x5a, 0x13, 0x99, 0xda, 0xff, 0x10, 0x84, 0x04, 0x8e, 0x7b, 0xd8, 0xdb, 0xe9,
    0xf8, 0x59,
]);

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

const TRANSFER_TAG: u8 = 3;
const MINT_TO_TAG: u8 = 7;
const TRANSFER_CHECKED_TAG: u8 = 12;
const MINT_TO_CHECKED_TAG: u8 = 14;
const CREATE_IDEMPOTENT_TAG: u8 = 1;

fn require_amount(amount: u64, what: &str) -> Result<(), TxError> {
    if amount == 0 {
        return Err(TxError::Validation(format!("{what} amount must be > 0")));
    }
    Ok(())
}

fn tagged_amount(tag: u8, amount: u64, decimals: Option<u8>) -> Vec<u8> {
    let mut data = Vec::with_capacity(10);
    data.push(tag);
    data.extend_from_slice(&amount.to_le_bytes());
    if let Some(decimals) = decimals {
        data.push(decimals);
    }
    data
}

/// Build an SPL Token `Transfer` of `amount` base units.
///
/// Accounts: source (writable), destination (writable), owner (signer).
pub fn transfer(
    token_program: &Pubkey,
    source: &Pubkey,
    destination: &Pubkey,
    owner: &Pubkey,
    amount: u64,
) -> Result<Instruction, TxError> {
    require_amount(amount, "SPL transfer")?;

    Ok(Instruction {
        program_id: *token_program,
        accounts: vec![
            AccountMeta::writable(*source, false),
            AccountMeta::writable(*destination, false),
            AccountMeta::readonly(*owner, true),
        ],
        data: tagged_amount(TRANSFER_TAG, amount, None),
    })
}

/// Build an SPL Token `TransferChecked`, which also pins the mint and decimals.
pub fn transfer_checked(
    token_program: &Pubkey,
    source: &Pubkey,
    mint: &Pubkey,
    destination: &Pubkey,
    owner: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Result<Instruction, TxError> {
    require_amount(amount, "SPL transfer")?;

    Ok(Instruction {
        program_id: *token_program,
        accounts: vec![
            AccountMeta::writable(*source, false),
            AccountMeta::readonly(*mint, false),
            AccountMeta::writable(*destination, false),
            AccountMeta::readonly(*owner, true),
        ],
        data: tagged_amount(TRANSFER_CHECKED_TAG, amount, Some(decimals)),
    })
}

/// Build an SPL Token `MintTo` (or `MintToChecked` when `decimals` is given).
///
/// Accounts: mint (writable), destination (writable), mint authority (signer).
pub fn mint_to(
    token_program: &Pubkey,
    mint: &Pubkey,
    destination: &Pubkey,
    mint_authority: &Pubkey,
    amount: u64,
    decimals: Option<u8>,
) -> Result<Instruction, TxError> {
    require_amount(amount, "SPL mint")?;

    let tag = if decimals.is_some() {
        MINT_TO_CHECKED_TAG
    } else {
        MINT_TO_TAG
    };

    Ok(Instruction {
        program_id: *token_program,
        accounts: vec![
            AccountMeta::writable(*mint, false),
            AccountMeta::writable(*destination, false),
            AccountMeta::readonly(*mint_authority, true),
        ],
        data: tagged_amount(tag, amount, decimals),
    })
}

/// Create the associated token account for `wallet` + `mint` if it does not
/// already exist.
pub fn create_associated_token_account_idempotent(
    funder: &Pubkey,
    wallet: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Result<Instruction, TxError> {
    let ata = derive_associated_token_address(wallet, mint, token_program)?;

    Ok(Instruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::writable(*funder, true),
            AccountMeta::writable(ata, false),
            AccountMeta::readonly(*wallet, false),
            AccountMeta::readonly(*mint, false),
            AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::readonly(*token_program, false),
        ],
        data: vec![CREATE_IDEMPOTENT_TAG],
    })
}

/// Derive the associated token account address for a wallet + mint pair.
///
/// The ATA is a Program Derived Address with seeds
/// `[wallet, token_program, mint]` under the Associated Token Account program.
pub fn derive_associated_token_address(
    wallet: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Result<Pubkey, TxError> {
    find_program_address(
        &[
            wallet.as_bytes().as_slice(),
            token_program.as_bytes().as_slice(),
            mint.as_bytes().as_slice(),
        ],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .map(|(address, _bump)| address)
}

/// Find a valid Program Derived Address for the given seeds and program.
///
/// Iterates bump seeds from 255 down to 0 and returns the first
/// `SHA-256(seeds || bump || program_id || "ProgramDerivedAddress")` that is
/// NOT a valid Ed25519 point.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<(Pubkey, u8), TxError> {
    for bump in (0u8..=255).rev() {
        if let Some(address) = try_create_program_address(seeds, &[bump], program_id) {
            return Ok((address, bump));
        }
    }

    Err(TxError::Validation("could not find valid PDA bump seed".into()))
}

fn try_create_program_address(
    seeds: &[&[u8]],
    bump_seed: &[u8],
    program_id: &Pubkey,
) -> Option<Pubkey> {
    let mut hasher = Sha256::new();

    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(bump_seed);
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);

    let hash: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&hash) {
        return None;
    }

    Some(Pubkey::new(hash))
}

/// Check if 32 bytes decompress to an Ed25519 curve point.
pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    curve25519_dalek::edwards::CompressedEdwardsY(*bytes)
        .decompress()
        .is_some()
}
