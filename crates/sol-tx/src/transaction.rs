//! Wire-format transactions: signature slots followed by the message.
//!
//! ```text
//!   num_signatures   compact-u16
//!   signatures       64 bytes * num_signatures (all-zero = empty slot)
//!   message          legacy or v0 message bytes
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::warn;

use crate::address::{Hash, Signature};
use crate::error::TxError;
use crate::keys::verify_signature;
use crate::message::CompiledMessage;
use crate::wire::{put_len, ByteReader};

/// A compiled message plus one signature slot per required signer.
///
/// `signatures[i]` belongs to `message.account_keys[i]`. A slot is either
/// empty or holds a signature that verifies over the current message bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<Signature>,
    pub message: CompiledMessage,
}

impl Transaction {
    /// Wrap a message with every signature slot empty.
    pub fn new_unsigned(message: CompiledMessage) -> Self {
        let slots = message.header.num_required_signatures as usize;
        Self {
            signatures: vec![Signature::EMPTY; slots],
            message,
        }
    }

    /// The bytes every signer signs.
    pub fn message_bytes(&self) -> Result<Vec<u8>, TxError> {
        self.message.serialize()
    }

    /// Serialize to wire format.
    pub fn serialize(&self) -> Result<Vec<u8>, TxError> {
        let message = self.message_bytes()?;
        let mut wire =
            Vec::with_capacity(3 + self.signatures.len() * Signature::LEN + message.len());
        put_len(&mut wire, self.signatures.len(), "signatures")?;
        for signature in &self.signatures {
            wire.extend_from_slice(signature.as_bytes());
        }
        wire.extend_from_slice(&message);
        Ok(wire)
    }

    /// Parse a wire-format transaction.
    ///
    /// Non-empty slots are checked against the message; one that does not
    /// verify is reset to empty so it can be signed again.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TxError> {
        let mut reader = ByteReader::new(bytes);

        let num_slots = reader.read_len()?;
        let mut signatures = Vec::with_capacity(num_slots);
        for _ in 0..num_slots {
            signatures.push(Signature::new(reader.read_array()?));
        }

        let message = CompiledMessage::read(&mut reader)?;
        reader.finish()?;

        let required = message.header.num_required_signatures as usize;
        if num_slots != required {
            return Err(TxError::Format(format!(
                "{num_slots} signature slots but the message requires {required}"
            )));
        }

        let mut tx = Self {
            signatures,
            message,
        };
        tx.clear_invalid_slots()?;
        Ok(tx)
    }

    pub fn to_base64(&self) -> Result<String, TxError> {
        Ok(BASE64.encode(self.serialize()?))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, TxError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| TxError::Serialization(format!("invalid base64 transaction: {e}")))?;
        Self::deserialize(&bytes)
    }

    /// Rebind the message to a new anchor. Every slot is cleared because the
    /// signed bytes change.
    pub fn with_anchor(&self, anchor: Hash) -> Self {
        let mut message = self.message.clone();
        message.anchor = Some(anchor);
        Self::new_unsigned(message)
    }

    /// Per-slot verification result; empty slots report `false`.
    pub fn verify_signatures(&self) -> Result<Vec<bool>, TxError> {
        let message = self.message_bytes()?;
        Ok(self
            .signatures
            .iter()
            .zip(self.message.required_signers())
            .map(|(signature, signer)| {
                !signature.is_empty() && verify_signature(signer, &message, signature)
            })
            .collect())
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signatures.iter().all(|s| !s.is_empty())
    }

    /// The fee payer's signature, which doubles as the transaction id.
    pub fn signature(&self) -> Option<&Signature> {
        self.signatures.first().filter(|s| !s.is_empty())
    }

    fn clear_invalid_slots(&mut self) -> Result<(), TxError> {
        if self.signatures.iter().all(Signature::is_empty) {
            return Ok(());
        }
        let valid = self.verify_signatures()?;
        for (index, ok) in valid.into_iter().enumerate() {
            let slot = &mut self.signatures[index];
            if !ok && !slot.is_empty() {
                warn!(
                    slot = index,
                    signer = %self.message.account_keys[index],
                    "discarding signature that does not verify over the message"
                );
                *slot = Signature::EMPTY;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Pubkey;
    use crate::compiler::{compile_transaction, Anchor};
    use crate::keys::Keypair;
    use crate::message::MessageVersion;
    use crate::system;

    fn keypair(seed: u8) -> Keypair {
        Keypair::from_bytes(&[seed; 32]).unwrap()
    }

    fn unsigned_transfer(payer: &Keypair) -> Transaction {
        let ix = system::transfer(&payer.pubkey(), &Pubkey::new([0xBB; 32]), 5_000).unwrap();
        compile_transaction(
            &payer.pubkey(),
            &[ix],
            &Anchor::Blockhash(Hash::new([0xAA; 32])),
            MessageVersion::Legacy,
            &[],
        )
        .unwrap()
    }

    // -- wire layout ----------------------------------------------------------

    #[test]
    fn unsigned_wire_layout() {
        let tx = unsigned_transfer(&keypair(1));
        let wire = tx.serialize().unwrap();

        assert_eq!(wire[0], 1);
        assert!(wire[1..65].iter().all(|&b| b == 0));
        assert_eq!(&wire[65..], &tx.message_bytes().unwrap()[..]);
    }

    #[test]
    fn deserialize_restores_signed_transaction() {
        let payer = keypair(1);
        let mut tx = unsigned_transfer(&payer);
        let message = tx.message_bytes().unwrap();
        tx.signatures[0] = payer.sign_message(&message);

        let restored = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();
        assert_eq!(restored, tx);
        assert_eq!(restored.verify_signatures().unwrap(), vec![true]);
        assert!(restored.is_fully_signed());
    }

    #[test]
    fn base64_roundtrip() {
        let tx = unsigned_transfer(&keypair(2));
        let encoded = tx.to_base64().unwrap();
        assert_eq!(Transaction::from_base64(&encoded).unwrap(), tx);
    }

    #[test]
    fn invalid_base64_is_a_serialization_error() {
        let err = Transaction::from_base64("not base64!!").unwrap_err();
        assert!(matches!(err, TxError::Serialization(_)));
    }

    // -- restoration ----------------------------------------------------------

    #[test]
    fn garbage_signature_is_reset_to_empty() {
        let mut tx = unsigned_transfer(&keypair(1));
        tx.signatures[0] = Signature::new([7u8; 64]);

        let restored = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();
        assert!(restored.signatures[0].is_empty());
        assert!(!restored.is_fully_signed());
    }

    #[test]
    fn slot_count_mismatch_fails() {
        let tx = unsigned_transfer(&keypair(1));
        let mut wire = tx.serialize().unwrap();
        // Claim two slots while the message still requires one.
        wire[0] = 2;
        wire.splice(1..1, [0u8; 64]);
        assert!(Transaction::deserialize(&wire).is_err());
    }

    #[test]
    fn truncated_wire_fails() {
        let wire = unsigned_transfer(&keypair(1)).serialize().unwrap();
        assert!(Transaction::deserialize(&wire[..wire.len() - 1]).is_err());
        assert!(Transaction::deserialize(&[]).is_err());
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut wire = unsigned_transfer(&keypair(1)).serialize().unwrap();
        wire.push(0);
        assert!(Transaction::deserialize(&wire).is_err());
    }

    // -- anchor ---------------------------------------------------------------

    #[test]
    fn with_anchor_clears_signatures() {
        let payer = keypair(1);
        let mut tx = unsigned_transfer(&payer);
        let message = tx.message_bytes().unwrap();
        tx.signatures[0] = payer.sign_message(&message);

        let rebound = tx.with_anchor(Hash::new([0xCC; 32]));
        assert_eq!(rebound.message.anchor, Some(Hash::new([0xCC; 32])));
        assert!(rebound.signatures[0].is_empty());
        assert_ne!(rebound.message_bytes().unwrap(), message);
    }

    #[test]
    fn signature_is_fee_payer_slot() {
        let payer = keypair(3);
        let mut tx = unsigned_transfer(&payer);
        assert!(tx.signature().is_none());

        let message = tx.message_bytes().unwrap();
        tx.signatures[0] = payer.sign_message(&message);
        assert_eq!(tx.signature(), Some(&tx.signatures[0]));
    }
}
