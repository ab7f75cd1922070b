//! Signing key material.
//!
//! Callers state the encoding of a key explicitly through [`KeyInput`]; there
//! is no guessing between hex, Base58 and byte arrays. Secret buffers are
//! zeroized on drop and never appear in `Debug` output or error messages.

use std::fmt;

use ed25519_dalek::Signer as _;
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::address::{Pubkey, Signature};
use crate::error::TxError;

/// A secret string that is zeroed when dropped and redacted in `Debug`.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretText(String);

impl SecretText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretText(<redacted>)")
    }
}

/// A secret byte array that is zeroed when dropped and redacted in `Debug`.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(<{} bytes redacted>)", self.0.len())
    }
}

/// A signing key as supplied at the API boundary, tagged with its encoding.
///
/// JSON form: `{"format": "base58", "value": "..."}`,
/// `{"format": "hex", "value": "..."}` or `{"format": "bytes", "value": [..]}`.
/// The decoded value is either a 64-byte keypair (seed followed by public
/// key) or a bare 32-byte seed.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "format", content = "value", rename_all = "snake_case")]
pub enum KeyInput {
    Base58(SecretText),
    Hex(SecretText),
    Bytes(SecretBytes),
}

impl KeyInput {
    /// Decode the input into a [`Keypair`].
    pub fn to_keypair(&self) -> Result<Keypair, TxError> {
        let raw: Zeroizing<Vec<u8>> = match self {
            KeyInput::Base58(text) => Zeroizing::new(
                bs58::decode(text.expose().trim())
                    .into_vec()
                    .map_err(|_| TxError::InvalidSigningKey("not valid base58".into()))?,
            ),
            KeyInput::Hex(text) => {
                let trimmed = text.expose().trim();
                let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
                Zeroizing::new(
                    hex::decode(digits)
                        .map_err(|_| TxError::InvalidSigningKey("not valid hex".into()))?,
                )
            }
            KeyInput::Bytes(bytes) => Zeroizing::new(bytes.0.clone()),
        };
        Keypair::from_bytes(&raw)
    }
}

/// An Ed25519 signing key with its Solana identity.
#[derive(Clone)]
pub struct Keypair {
    signing_key: ed25519_dalek::SigningKey,
}

impl Keypair {
    /// Build from a 32-byte seed or a 64-byte `seed || pubkey` keypair.
    ///
    /// For the 64-byte form the public half must match the seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TxError> {
        match bytes.len() {
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(bytes);
                let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
                seed.zeroize();
                Ok(Self { signing_key })
            }
            64 => {
                let mut pair = [0u8; 64];
                pair.copy_from_slice(bytes);
                let result = ed25519_dalek::SigningKey::from_keypair_bytes(&pair);
                pair.zeroize();
                let signing_key = result.map_err(|_| {
                    TxError::InvalidSigningKey(
                        "public key half does not match the secret seed".into(),
                    )
                })?;
                Ok(Self { signing_key })
            }
            n => Err(TxError::InvalidSigningKey(format!(
                "expected 32 or 64 bytes, got {n}"
            ))),
        }
    }

    pub fn from_signing_key(signing_key: ed25519_dalek::SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new(self.signing_key.verifying_key().to_bytes())
    }

    /// Detached Ed25519 signature over `message`.
    pub fn sign_message(&self, message: &[u8]) -> Signature {
        Signature::new(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}

/// Check a detached signature against `signer` for `message`.
pub fn verify_signature(signer: &Pubkey, message: &[u8], signature: &Signature) -> bool {
    let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(signer.as_bytes()) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    key.verify_strict(message, &sig).is_ok()
}
