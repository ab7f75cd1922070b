//! Partial-signature tracking.
//!
//! Signatures are placed by identity: the slot for a key is its index among
//! the message's required signers, so callers may sign in any order and pass
//! any superset of keys.

use serde::Serialize;
use tracing::debug;

use crate::address::Pubkey;
use crate::error::TxError;
use crate::keys::Keypair;
use crate::transaction::Transaction;

/// Completion state of a transaction after a signing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningStatus {
    pub total_required: usize,
    /// Slots filled by this call.
    pub added: usize,
    /// Slots that were already filled before this call.
    pub already_signed: usize,
    pub is_fully_signed: bool,
    pub remaining_signers: Vec<Pubkey>,
}

impl SigningStatus {
    /// Status of a transaction without signing anything.
    pub fn of(tx: &Transaction) -> Self {
        Self::build(tx, 0, filled(tx))
    }

    fn build(tx: &Transaction, added: usize, already_signed: usize) -> Self {
        let remaining_signers: Vec<Pubkey> = tx
            .message
            .required_signers()
            .iter()
            .zip(&tx.signatures)
            .filter(|(_, sig)| sig.is_empty())
            .map(|(key, _)| *key)
            .collect();

        Self {
            total_required: tx.signatures.len(),
            added,
            already_signed,
            is_fully_signed: remaining_signers.is_empty(),
            remaining_signers,
        }
    }
}

fn filled(tx: &Transaction) -> usize {
    tx.signatures.iter().filter(|s| !s.is_empty()).count()
}

/// Apply every matching key to its empty slot.
///
/// Keys that are not required signers are ignored. Slots that are already
/// filled are left alone, which makes re-signing idempotent since Ed25519
/// signatures are deterministic.
pub fn sign(tx: &mut Transaction, keys: &[Keypair]) -> Result<SigningStatus, TxError> {
    if tx.message.anchor.is_none() {
        return Err(TxError::MissingAnchor);
    }

    let already_signed = filled(tx);
    let message = tx.message_bytes()?;
    let mut added = 0;

    for keypair in keys {
        let pubkey = keypair.pubkey();
        let Some(slot) = tx
            .message
            .required_signers()
            .iter()
            .position(|signer| *signer == pubkey)
        else {
            debug!(key = %pubkey, "ignoring key that is not a required signer");
            continue;
        };

        if tx.signatures[slot].is_empty() {
            tx.signatures[slot] = keypair.sign_message(&message);
            added += 1;
            debug!(key = %pubkey, slot, "placed signature");
        }
    }

    Ok(SigningStatus::build(tx, added, already_signed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Hash;
    use crate::compiler::{compile_transaction, Anchor};
    use crate::instruction::{AccountMeta, Instruction};
    use crate::message::MessageVersion;
    use crate::system;

    fn keypair(seed: u8) -> Keypair {
        Keypair::from_bytes(&[seed; 32]).unwrap()
    }

    /// Fee payer `a` plus a second required signer `b`.
    fn two_signer_tx(a: &Keypair, b: &Keypair, anchor: Anchor) -> Transaction {
        let ix = Instruction {
            program_id: Pubkey::new([0x99; 32]),
            accounts: vec![
                AccountMeta::writable(a.pubkey(), true),
                AccountMeta::readonly(b.pubkey(), true),
            ],
            data: vec![1],
        };
        compile_transaction(&a.pubkey(), &[ix], &anchor, MessageVersion::Legacy, &[]).unwrap()
    }

    fn anchor() -> Anchor {
        Anchor::Blockhash(Hash::new([0xAA; 32]))
    }

    #[test]
    fn partial_then_complete() {
        let (a, b) = (keypair(1), keypair(2));
        let mut tx = two_signer_tx(&a, &b, anchor());

        let status = sign(&mut tx, &[a.clone()]).unwrap();
        assert_eq!(status.total_required, 2);
        assert_eq!(status.added, 1);
        assert_eq!(status.already_signed, 0);
        assert!(!status.is_fully_signed);
        assert_eq!(status.remaining_signers, vec![b.pubkey()]);

        let status = sign(&mut tx, &[b.clone()]).unwrap();
        assert_eq!(status.added, 1);
        assert_eq!(status.already_signed, 1);
        assert!(status.is_fully_signed);
        assert!(status.remaining_signers.is_empty());
        assert_eq!(tx.verify_signatures().unwrap(), vec![true, true]);
    }

    #[test]
    fn signing_order_does_not_matter() {
        let (a, b) = (keypair(1), keypair(2));
        let mut forward = two_signer_tx(&a, &b, anchor());
        let mut reverse = forward.clone();

        sign(&mut forward, &[a.clone(), b.clone()]).unwrap();
        sign(&mut reverse, &[b.clone()]).unwrap();
        sign(&mut reverse, &[a.clone()]).unwrap();

        assert_eq!(forward.signatures, reverse.signatures);
    }

    #[test]
    fn unrelated_key_is_ignored() {
        let (a, b, c) = (keypair(1), keypair(2), keypair(3));
        let mut tx = two_signer_tx(&a, &b, anchor());
        sign(&mut tx, &[a.clone()]).unwrap();

        let status = sign(&mut tx, &[c]).unwrap();
        assert_eq!(status.added, 0);
        assert_eq!(status.remaining_signers, vec![b.pubkey()]);
    }

    #[test]
    fn resigning_is_idempotent() {
        let (a, b) = (keypair(1), keypair(2));
        let mut tx = two_signer_tx(&a, &b, anchor());
        sign(&mut tx, &[a.clone()]).unwrap();
        let before = tx.signatures.clone();

        let status = sign(&mut tx, &[a.clone(), a.clone()]).unwrap();
        assert_eq!(status.added, 0);
        assert_eq!(status.already_signed, 1);
        assert_eq!(tx.signatures, before);
    }

    #[test]
    fn duplicate_keys_fill_one_slot() {
        let (a, b) = (keypair(1), keypair(2));
        let mut tx = two_signer_tx(&a, &b, anchor());
        let status = sign(&mut tx, &[b.clone(), b.clone()]).unwrap();
        assert_eq!(status.added, 1);
        assert_eq!(tx.signatures.len(), 2);
    }

    #[test]
    fn missing_anchor_is_rejected() {
        let (a, b) = (keypair(1), keypair(2));
        let mut tx = two_signer_tx(&a, &b, Anchor::Unset);
        assert_eq!(sign(&mut tx, &[a]).unwrap_err(), TxError::MissingAnchor);
        assert!(tx.signatures.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn status_survives_serialization() {
        let (a, b) = (keypair(1), keypair(2));
        let mut tx = two_signer_tx(&a, &b, anchor());
        sign(&mut tx, &[b.clone()]).unwrap();

        let restored = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();
        let status = SigningStatus::of(&restored);
        assert_eq!(status.already_signed, 1);
        assert_eq!(status.remaining_signers, vec![a.pubkey()]);
    }

    #[test]
    fn single_transfer_signs_fully() {
        let payer = keypair(5);
        let ix = system::transfer(&payer.pubkey(), &Pubkey::new([0xBB; 32]), 1).unwrap();
        let mut tx = compile_transaction(&payer.pubkey(), &[ix], &anchor(), MessageVersion::V0, &[])
            .unwrap();
        let status = sign(&mut tx, &[payer]).unwrap();
        assert!(status.is_fully_signed);
        assert!(tx.signature().is_some());
    }
}
