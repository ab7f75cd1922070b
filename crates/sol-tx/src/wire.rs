//! Low-level pieces of Solana's compact binary layout.
//!
//! Lengths are written as compact-u16 ("shortvec"): 7 bits per byte, high bit
//! set on every byte except the last, at most 3 bytes.

use crate::error::TxError;

/// Encode a `u16` value in Solana's compact-u16 format.
///
/// - Values 0..0x7f       -> 1 byte
/// - Values 0x80..0x3fff  -> 2 bytes
/// - Values 0x4000..      -> 3 bytes
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

/// Append a compact-u16 length prefix, failing if `len` does not fit.
pub fn put_len(buf: &mut Vec<u8>, len: usize, what: &str) -> Result<(), TxError> {
    let len = u16::try_from(len)
        .map_err(|_| TxError::Serialization(format!("too many {what}: {len}")))?;
    buf.extend_from_slice(&encode_compact_u16(len));
    Ok(())
}

/// Decode a compact-u16 value from a byte slice.
///
/// Returns `(value, bytes_consumed)` or an error if the data is truncated,
/// overflows, or uses a non-canonical (alias) encoding.
pub fn decode_compact_u16(data: &[u8]) -> Result<(u16, usize), TxError> {
    let mut value: u32 = 0;

    for (i, byte) in data.iter().take(3).enumerate() {
        let byte = *byte;
        value |= ((byte & 0x7f) as u32) << (7 * i);

        if byte & 0x80 == 0 {
            if i > 0 && byte == 0 {
                return Err(TxError::Serialization(
                    "non-canonical compact-u16 encoding".into(),
                ));
            }
            if value > u16::MAX as u32 {
                return Err(TxError::Serialization("compact-u16 value overflow".into()));
            }
            return Ok((value as u16, i + 1));
        }

        if i == 2 {
            return Err(TxError::Serialization("compact-u16 value overflow".into()));
        }
    }

    Err(TxError::Serialization(
        "unexpected end of data while decoding compact-u16".into(),
    ))
}

/// Cursor over a serialized transaction or message.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8, TxError> {
        let byte = self.peek_u8().ok_or_else(|| truncated("u8"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_len(&mut self) -> Result<usize, TxError> {
        let (value, consumed) = decode_compact_u16(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value as usize)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], TxError> {
        if self.remaining() < len {
            return Err(truncated(&format!("{len} bytes")));
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], TxError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), TxError> {
        if self.remaining() != 0 {
            return Err(TxError::Serialization(format!(
                "{} trailing bytes after transaction",
                self.remaining()
            )));
        }
        Ok(())
    }
}

fn truncated(what: &str) -> TxError {
    TxError::Serialization(format!("unexpected end of data while reading {what}"))
}
