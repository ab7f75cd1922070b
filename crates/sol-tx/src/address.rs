//! Solana identities: account addresses, signatures and anchor hashes.
//!
//! Solana addresses are simply Base58-encoded 32-byte Ed25519 public keys.
//! There is no hashing step. Signatures (64 bytes) and blockhashes (32 bytes)
//! use the same Base58 text form, so all three share one implementation.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TxError;

macro_rules! base58_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr, $err:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn to_bytes(&self) -> [u8; $len] {
                self.0
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Decode from a byte slice, which must be exactly `LEN` bytes.
            pub fn try_from_slice(bytes: &[u8]) -> Result<Self, TxError> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| {
                    $err(format!("expected {} bytes, got {}", $len, bytes.len()))
                })?;
                Ok(Self(arr))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&bs58::encode(&self.0).into_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = TxError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = bs58::decode(s)
                    .into_vec()
                    .map_err(|e| $err(format!("base58 decode failed: {e}")))?;
                Self::try_from_slice(&bytes)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

base58_newtype!(
    /// A 32-byte account identity (Ed25519 public key or program-derived address).
    Pubkey,
    32,
    TxError::InvalidPublicKey
);

base58_newtype!(
    /// A 64-byte Ed25519 signature. The all-zero value marks an empty slot.
    Signature,
    64,
    TxError::Format
);

base58_newtype!(
    /// A 32-byte anchor value: a recent blockhash or a durable nonce.
    Hash,
    32,
    TxError::Format
);

impl Signature {
    /// Placeholder written into unsigned slots on the wire.
    pub const EMPTY: Signature = Signature([0u8; 64]);

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// Resolve a caller-supplied address, naming the offending field on failure.
///
/// `field` is a path such as `instructions[1].accounts[2].address`; the
/// resulting error is a validation error so the caller learns exactly which
/// entry was malformed.
pub fn resolve_address(field: &str, address: &str) -> Result<Pubkey, TxError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(TxError::Validation(format!("{field}: address is empty")));
    }
    trimmed
        .parse::<Pubkey>()
        .map_err(|e| TxError::Validation(format!("{field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The System Program address is 32 zero bytes, which encodes to
    /// "11111111111111111111111111111111" in Base58.
    #[test]
    fn system_program_address() {
        let zeros = Pubkey::new([0u8; 32]);
        assert_eq!(zeros.to_string(), "11111111111111111111111111111111");
    }

    #[test]
    fn roundtrip_encode_decode() {
        let address = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
        let key: Pubkey = address.parse().unwrap();
        assert_eq!(key.to_string(), address);
    }

    #[test]
    fn parse_garbage_returns_error() {
        assert!("not-a-valid-address!!!".parse::<Pubkey>().is_err());
    }

    #[test]
    fn parse_too_short_returns_error() {
        // "1" decodes to a single zero byte, which is not 32 bytes.
        let err = "1".parse::<Pubkey>().unwrap_err();
        assert!(matches!(err, TxError::InvalidPublicKey(_)));
    }

    #[test]
    fn resolve_address_names_the_field() {
        let err = resolve_address("instructions[0].accounts[3].address", "0OIl").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("instructions[0].accounts[3].address"), "{msg}");
        assert!(err.is_validation());
    }

    #[test]
    fn resolve_address_rejects_blank() {
        let err = resolve_address("fee_payer", "   ").unwrap_err();
        assert!(err.to_string().contains("fee_payer: address is empty"));
    }

    #[test]
    fn resolve_address_trims_whitespace() {
        let key = resolve_address("x", " MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr\n").unwrap();
        assert_eq!(key.to_string(), "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");
    }

    #[test]
    fn signature_empty_detection() {
        assert!(Signature::EMPTY.is_empty());
        let mut bytes = [0u8; 64];
        bytes[63] = 1;
        assert!(!Signature::new(bytes).is_empty());
    }

    #[test]
    fn signature_text_is_at_most_88_chars() {
        let sig = Signature::new([0xffu8; 64]);
        assert!(sig.to_string().len() <= 88);
        assert_eq!(sig.to_string().parse::<Signature>().unwrap(), sig);
    }

    #[test]
    fn serde_uses_base58_strings() {
        let key = Pubkey::new([7u8; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
        let back: Pubkey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn serde_rejects_wrong_length() {
        let result: Result<Hash, _> = serde_json::from_str("\"111\"");
        assert!(result.is_err());
    }
}
